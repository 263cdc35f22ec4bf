use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::State, Json};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{error::Error, mongo_ext::Collection, util::ObjectIdString};

use super::auth::AdminSession;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub message: String,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: &MessageModel) -> Result<(), Error>;

    async fn find_all(&self) -> Result<Vec<MessageModel>, Error>;
}

#[derive(Clone)]
pub struct MessageStoreHandle(pub Arc<dyn MessageStore>);

impl std::ops::Deref for MessageStoreHandle {
    type Target = dyn MessageStore;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[derive(Clone)]
pub struct MessageCollection(pub Collection<MessageModel>);

impl std::ops::Deref for MessageCollection {
    type Target = Collection<MessageModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl MessageStore for MessageCollection {
    async fn insert(&self, message: &MessageModel) -> Result<(), Error> {
        self.insert_one(message, None)
            .await
            .map(|_| ())
            .map_err(Into::into)
    }

    async fn find_all(&self) -> Result<Vec<MessageModel>, Error> {
        self.collect_all(None).await
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct MessageRequest {
    #[validate(length(min = 3, message = "First Name Must Contain At Least 3 Characters!"))]
    pub first_name: String,

    #[validate(length(min = 3, message = "Last Name Must Contain At Least 3 Characters!"))]
    pub last_name: String,

    #[validate(email(message = "Provide A Valid Email!"))]
    pub email: String,

    #[validate(length(equal = 11, message = "Phone Number Must Contain Exact 11 Digits!"))]
    pub phone: String,

    #[validate(length(min = 10, message = "Message Must Contain At Least 10 Characters!"))]
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessageResponse {
    pub id: ObjectIdString,

    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub message: String,
}

impl From<MessageModel> for MessageResponse {
    fn from(value: MessageModel) -> Self {
        Self {
            id: value.id.into(),

            first_name: value.first_name,
            last_name: value.last_name,
            email: value.email,
            phone: value.phone,
            message: value.message,
        }
    }
}

pub async fn send_message(
    State(messages): State<MessageStoreHandle>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, Error> {
    request.validate()?;

    let model = MessageModel {
        id: ObjectId::new(),
        first_name: request.first_name,
        last_name: request.last_name,
        email: request.email,
        phone: request.phone,
        message: request.message,
    };
    messages.insert(&model).await?;

    Ok(Json(model.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessagesResponse {
    pub messages: Vec<MessageResponse>,
}

pub async fn get_all_messages(
    State(messages): State<MessageStoreHandle>,
    _session: AdminSession,
) -> Result<Json<MessagesResponse>, Error> {
    let messages = messages.find_all().await?;

    Ok(Json(MessagesResponse {
        messages: messages.into_iter().map(Into::into).collect(),
    }))
}
