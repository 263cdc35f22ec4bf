use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    api::v1::{
        appointment::{AppointmentCollection, AppointmentStoreHandle},
        auth::{CredentialStoreHandle, UserCollection},
        avatar::{AvatarStoreHandle, CloudinaryStore},
        message::{MessageCollection, MessageStoreHandle},
        token::JwtState,
    },
    config::Config,
    migrate::{run_migration, MigrationCollection},
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub config: Config,
    pub argon: argon2::Argon2<'static>,
    pub jwt_state: JwtState,

    pub users: CredentialStoreHandle,
    pub appointments: AppointmentStoreHandle,
    pub messages: MessageStoreHandle,
    pub avatars: AvatarStoreHandle,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let argon = argon2::Argon2::default();
        let jwt_state = JwtState::from_config(&config);

        let mongo_client_opt =
            mongodb::options::ClientOptions::parse(&config.mongodb_uri).await?;
        let mongo_client = mongodb::Client::with_options(mongo_client_opt)?;
        let db = mongo_client.database(&config.database_name);

        let users = UserCollection(db.collection("users").into());
        let appointments = AppointmentCollection(db.collection("appointments").into());
        let messages = MessageCollection(db.collection("messages").into());
        let migrations = MigrationCollection(db.collection("migrations").into());

        run_migration(&migrations, &users).await?;

        let avatars = CloudinaryStore::new(&config);

        Ok(Self {
            config,
            argon,
            jwt_state,

            users: CredentialStoreHandle(Arc::new(users)),
            appointments: AppointmentStoreHandle(Arc::new(appointments)),
            messages: MessageStoreHandle(Arc::new(messages)),
            avatars: AvatarStoreHandle(Arc::new(avatars)),
        })
    }
}
