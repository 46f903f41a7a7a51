// Bookable resources
// Typed drafts and entities for each resource the marketplace creates, plus the
// strategy that tells the optimistic mutator which cache partitions each one lives in

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::api::{ApiError, ApiRequest, Attachment, ResourceApi};
use crate::cache::PartitionKey;
use crate::schedule::{availability_badge, AvailabilityBadge, WeeklySchedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Room,
    Restaurant,
    Service,
    Address,
    ProfileImage,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Room => "rooms",
            ResourceKind::Restaurant => "restaurants",
            ResourceKind::Service => "services",
            ResourceKind::Address => "addresses",
            ResourceKind::ProfileImage => "profile-images",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            ResourceKind::Room => "rooms",
            ResourceKind::Restaurant => "restaurants",
            ResourceKind::Service => "services",
            ResourceKind::Address => "users/address",
            ResourceKind::ProfileImage => "users/profile-image",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParentKind {
    Service,
    Host,
    User,
}

impl ParentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentKind::Service => "service",
            ParentKind::Host => "host",
            ParentKind::User => "user",
        }
    }
}

/// Per-kind configuration for [`crate::mutator::OptimisticMutator`].
///
/// Implementations are zero-sized markers (`Rooms`, `Restaurants`, ...);
/// everything the mutator needs to know about a kind is an associated
/// function here.
pub trait Resource: Send + Sync + 'static {
    type Payload: Serialize + Send + Sync;
    type Entity: Clone + PartialEq + DeserializeOwned + Send + Sync + 'static;

    const KIND: ResourceKind;

    // Wire names of required fields the payload leaves empty
    fn missing_fields(payload: &Self::Payload) -> Vec<&'static str>;

    // Every cache partition the created entity belongs to
    fn partitions(payload: &Self::Payload) -> Vec<PartitionKey>;

    // Partition that must not already hold a confirmed entity
    fn duplicate_scope(_payload: &Self::Payload) -> Option<PartitionKey> {
        None
    }

    fn provisional(payload: &Self::Payload, client_id: &str) -> Self::Entity;

    fn entity_id(entity: &Self::Entity) -> &str;

    fn create_request(payload: &Self::Payload) -> Result<ApiRequest, ApiError> {
        let body =
            serde_json::to_value(payload).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        Ok(ApiRequest::post_json(Self::KIND.endpoint(), body))
    }

    // Uploaded after the primary create, keyed by the new id
    fn attachments(_payload: &Self::Payload) -> Vec<Attachment> {
        Vec::new()
    }

    fn attachment_path(id: &str) -> String {
        format!("{}/{}/images", Self::KIND.endpoint(), id)
    }
}

// Loads one partition from the backend; usable as a background refetch loader
pub async fn fetch_partition<R: Resource>(
    api: Arc<dyn ResourceApi>,
    key: PartitionKey,
) -> Result<Vec<R::Entity>, ApiError> {
    let path = key
        .list_path()
        .unwrap_or_else(|| R::KIND.endpoint().to_string());
    let data = api.send(ApiRequest::get(path)).await?;
    serde_json::from_value(data).map_err(|e| ApiError::Decode(e.to_string()))
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

// Rooms

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(rename = "_id")]
    pub id: String,
    pub service_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub room_type: String,
    pub price_per_night: f64,
    pub capacity: u32,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub amenities: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDraft {
    pub service_id: String,
    pub name: String,
    pub description: String,
    pub room_type: String,
    pub price_per_night: Option<f64>,
    pub capacity: Option<u32>,
    pub amenities: Vec<String>,
    #[serde(skip)]
    pub images: Vec<Attachment>,
}

pub struct Rooms;

impl Resource for Rooms {
    type Payload = RoomDraft;
    type Entity = Room;

    const KIND: ResourceKind = ResourceKind::Room;

    fn missing_fields(draft: &RoomDraft) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if blank(&draft.service_id) {
            missing.push("serviceId");
        }
        if blank(&draft.name) {
            missing.push("name");
        }
        if draft.price_per_night.is_none() {
            missing.push("pricePerNight");
        }
        if draft.capacity.map_or(true, |capacity| capacity == 0) {
            missing.push("capacity");
        }
        missing
    }

    fn partitions(draft: &RoomDraft) -> Vec<PartitionKey> {
        vec![
            PartitionKey::all(ResourceKind::Room),
            PartitionKey::by_parent(ResourceKind::Room, ParentKind::Service, &draft.service_id),
        ]
    }

    // One room listing per service
    fn duplicate_scope(draft: &RoomDraft) -> Option<PartitionKey> {
        Some(PartitionKey::by_parent(
            ResourceKind::Room,
            ParentKind::Service,
            &draft.service_id,
        ))
    }

    fn provisional(draft: &RoomDraft, client_id: &str) -> Room {
        Room {
            id: client_id.to_string(),
            service_id: draft.service_id.clone(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            room_type: draft.room_type.clone(),
            price_per_night: draft.price_per_night.unwrap_or_default(),
            capacity: draft.capacity.unwrap_or_default(),
            is_available: true,
            amenities: draft.amenities.clone(),
            images: Vec::new(),
        }
    }

    fn entity_id(room: &Room) -> &str {
        &room.id
    }

    fn attachments(draft: &RoomDraft) -> Vec<Attachment> {
        draft.images.clone()
    }
}

// Restaurants

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restaurant {
    #[serde(rename = "_id")]
    pub id: String,
    pub service_id: String,
    pub name: String,
    #[serde(default)]
    pub cuisine_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub opening_hours: WeeklySchedule,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub images: Vec<String>,
}

impl Restaurant {
    pub fn availability(&self, now: &NaiveDateTime) -> AvailabilityBadge {
        availability_badge(self.is_available, &self.opening_hours, now)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantDraft {
    pub service_id: String,
    pub name: String,
    pub cuisine_type: String,
    pub description: String,
    pub opening_hours: WeeklySchedule,
    #[serde(skip)]
    pub images: Vec<Attachment>,
}

pub struct Restaurants;

impl Resource for Restaurants {
    type Payload = RestaurantDraft;
    type Entity = Restaurant;

    const KIND: ResourceKind = ResourceKind::Restaurant;

    fn missing_fields(draft: &RestaurantDraft) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if blank(&draft.service_id) {
            missing.push("serviceId");
        }
        if blank(&draft.name) {
            missing.push("name");
        }
        if blank(&draft.cuisine_type) {
            missing.push("cuisineType");
        }
        missing
    }

    fn partitions(draft: &RestaurantDraft) -> Vec<PartitionKey> {
        vec![
            PartitionKey::all(ResourceKind::Restaurant),
            PartitionKey::by_parent(
                ResourceKind::Restaurant,
                ParentKind::Service,
                &draft.service_id,
            ),
        ]
    }

    fn duplicate_scope(draft: &RestaurantDraft) -> Option<PartitionKey> {
        Some(PartitionKey::by_parent(
            ResourceKind::Restaurant,
            ParentKind::Service,
            &draft.service_id,
        ))
    }

    fn provisional(draft: &RestaurantDraft, client_id: &str) -> Restaurant {
        Restaurant {
            id: client_id.to_string(),
            service_id: draft.service_id.clone(),
            name: draft.name.clone(),
            cuisine_type: draft.cuisine_type.clone(),
            description: draft.description.clone(),
            opening_hours: draft.opening_hours.clone(),
            is_available: true,
            images: Vec::new(),
        }
    }

    fn entity_id(restaurant: &Restaurant) -> &str {
        &restaurant.id
    }

    fn attachments(draft: &RestaurantDraft) -> Vec<Attachment> {
        draft.images.clone()
    }
}

// Services (a host's listing that rooms and restaurants hang off)

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Hotel,
    Restaurant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(rename = "_id")]
    pub id: String,
    pub host_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub service_type: ServiceType,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub location: Option<Coordinates>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDraft {
    pub host_id: String,
    pub name: String,
    pub description: String,
    pub service_type: Option<ServiceType>,
    pub address: String,
    pub location: Option<Coordinates>,
    #[serde(skip)]
    pub images: Vec<Attachment>,
}

pub struct Services;

impl Resource for Services {
    type Payload = ServiceDraft;
    type Entity = Service;

    const KIND: ResourceKind = ResourceKind::Service;

    fn missing_fields(draft: &ServiceDraft) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if blank(&draft.host_id) {
            missing.push("hostId");
        }
        if blank(&draft.name) {
            missing.push("name");
        }
        if draft.service_type.is_none() {
            missing.push("serviceType");
        }
        if blank(&draft.address) {
            missing.push("address");
        }
        missing
    }

    fn partitions(draft: &ServiceDraft) -> Vec<PartitionKey> {
        vec![
            PartitionKey::all(ResourceKind::Service),
            PartitionKey::by_parent(ResourceKind::Service, ParentKind::Host, &draft.host_id),
        ]
    }

    fn provisional(draft: &ServiceDraft, client_id: &str) -> Service {
        Service {
            id: client_id.to_string(),
            host_id: draft.host_id.clone(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            service_type: draft.service_type.unwrap_or(ServiceType::Hotel),
            address: draft.address.clone(),
            location: draft.location,
            images: Vec::new(),
        }
    }

    fn entity_id(service: &Service) -> &str {
        &service.id
    }

    fn attachments(draft: &ServiceDraft) -> Vec<Attachment> {
        draft.images.clone()
    }
}

// User address

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAddress {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub user_id: String,
    pub street: String,
    pub city: String,
    #[serde(default)]
    pub state: String,
    pub country: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub location: Option<Coordinates>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressUpdate {
    pub user_id: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub postal_code: String,
    pub location: Option<Coordinates>,
}

pub struct Addresses;

impl Resource for Addresses {
    type Payload = AddressUpdate;
    type Entity = UserAddress;

    const KIND: ResourceKind = ResourceKind::Address;

    fn missing_fields(update: &AddressUpdate) -> Vec<&'static str> {
        [
            ("userId", &update.user_id),
            ("street", &update.street),
            ("city", &update.city),
            ("country", &update.country),
        ]
        .into_iter()
        .filter(|(_, value)| blank(value))
        .map(|(field, _)| field)
        .collect()
    }

    fn partitions(update: &AddressUpdate) -> Vec<PartitionKey> {
        vec![PartitionKey::by_parent(
            ResourceKind::Address,
            ParentKind::User,
            &update.user_id,
        )]
    }

    fn provisional(update: &AddressUpdate, client_id: &str) -> UserAddress {
        UserAddress {
            id: client_id.to_string(),
            user_id: update.user_id.clone(),
            street: update.street.clone(),
            city: update.city.clone(),
            state: update.state.clone(),
            country: update.country.clone(),
            postal_code: update.postal_code.clone(),
            location: update.location,
        }
    }

    fn entity_id(address: &UserAddress) -> &str {
        &address.id
    }

    fn create_request(update: &AddressUpdate) -> Result<ApiRequest, ApiError> {
        let body =
            serde_json::to_value(update).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        Ok(ApiRequest::put_json(ResourceKind::Address.endpoint(), body))
    }
}

// Profile image

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileImage {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileImageUpload {
    pub user_id: String,
    #[serde(skip)]
    pub image: Option<Attachment>,
}

pub struct ProfileImages;

impl Resource for ProfileImages {
    type Payload = ProfileImageUpload;
    type Entity = ProfileImage;

    const KIND: ResourceKind = ResourceKind::ProfileImage;

    fn missing_fields(upload: &ProfileImageUpload) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if blank(&upload.user_id) {
            missing.push("userId");
        }
        if upload
            .image
            .as_ref()
            .map_or(true, |image| image.bytes.is_empty())
        {
            missing.push("profileImage");
        }
        missing
    }

    fn partitions(upload: &ProfileImageUpload) -> Vec<PartitionKey> {
        vec![PartitionKey::by_parent(
            ResourceKind::ProfileImage,
            ParentKind::User,
            &upload.user_id,
        )]
    }

    // Shown with the local file name until the upload returns the hosted URL
    fn provisional(upload: &ProfileImageUpload, client_id: &str) -> ProfileImage {
        ProfileImage {
            id: client_id.to_string(),
            user_id: upload.user_id.clone(),
            url: upload
                .image
                .as_ref()
                .map(|image| image.file_name.clone())
                .unwrap_or_default(),
        }
    }

    fn entity_id(image: &ProfileImage) -> &str {
        &image.id
    }

    // The upload is the create call itself
    fn create_request(upload: &ProfileImageUpload) -> Result<ApiRequest, ApiError> {
        let image = upload
            .image
            .clone()
            .ok_or_else(|| ApiError::InvalidRequest("profile image is missing".to_string()))?;
        Ok(ApiRequest::multipart(
            ResourceKind::ProfileImage.endpoint(),
            vec![image.with_field("profileImage")],
        ))
    }
}
