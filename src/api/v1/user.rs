use std::{collections::HashMap, str::FromStr};

use argon2::Argon2;
use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    error::Error,
    util::{hash_password, FormattedDateTime},
};

use super::{
    auth::{
        create_user, AdminSession, CredentialStore, CredentialStoreHandle, Gender, PatientSession,
        RegisterRequest, UserModel, UserResponse, UserRole, UserUpdate,
    },
    avatar::{ensure_supported_format, AvatarFile, AvatarStore, AvatarStoreHandle},
};

pub async fn add_new_admin(
    State(users): State<CredentialStoreHandle>,
    State(argon): State<Argon2<'static>>,
    _session: AdminSession,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<UserResponse>, Error> {
    let admin = create_user(users, argon, request.into_create(UserRole::Admin)).await?;

    Ok(Json(admin.into()))
}

#[derive(Validate, Debug, Clone)]
pub struct CreateDoctorRequest {
    #[validate(length(min = 3, message = "First Name Must Contain At Least 3 Characters!"))]
    pub first_name: String,

    #[validate(length(min = 3, message = "Last Name Must Contain At Least 3 Characters!"))]
    pub last_name: String,

    #[validate(email(message = "Provide A Valid Email!"))]
    pub email: String,

    #[validate(length(equal = 11, message = "Phone Number Must Contain Exact 11 Digits!"))]
    pub phone: String,

    #[validate(length(equal = 13, message = "NIC Must Contain Only 13 Digits!"))]
    pub nic: String,

    pub dob: FormattedDateTime,

    pub gender: Gender,

    #[validate(length(min = 8, max = 64, message = "Password Must Contain At Least 8 Characters!"))]
    pub password: String,

    #[validate(length(min = 1, message = "Please Fill Full Form!"))]
    pub doctor_department: String,
}

pub async fn create_doctor(
    users: CredentialStoreHandle,
    avatars: AvatarStoreHandle,
    argon: Argon2<'_>,
    request: CreateDoctorRequest,
    avatar: AvatarFile,
) -> Result<UserModel, Error> {
    // Rejected formats never reach the asset host or the store.
    ensure_supported_format(&avatar.content_type)?;
    request.validate()?;

    if users.find_by_email(&request.email).await?.is_some() {
        return Err(Error::DuplicateEntry("email"));
    }

    let doc_avatar = avatars.upload(avatar).await?;

    let model = UserModel {
        id: ObjectId::new(),
        first_name: request.first_name,
        last_name: request.last_name,
        email: request.email,
        phone: request.phone,
        nic: request.nic,
        dob: request.dob.into(),
        gender: request.gender,
        password: hash_password(&argon, &request.password)?,
        role: UserRole::Doctor,
        doctor_department: Some(request.doctor_department),
        doc_avatar: Some(doc_avatar),
    };
    users.insert(&model).await?;

    Ok(model)
}

pub async fn add_new_doctor(
    State(users): State<CredentialStoreHandle>,
    State(avatars): State<AvatarStoreHandle>,
    State(argon): State<Argon2<'static>>,
    _session: AdminSession,
    multipart: Multipart,
) -> Result<Json<UserResponse>, Error> {
    let (request, avatar) = read_doctor_form(multipart).await?;

    create_doctor(users, avatars, argon, request, avatar)
        .await
        .map(|it| Json(it.into()))
}

async fn read_doctor_form(
    mut multipart: Multipart,
) -> Result<(CreateDoctorRequest, AvatarFile), Error> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut avatar: Option<AvatarFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| Error::IncompleteForm)?
    {
        let name = match field.name() {
            Some(name) => name.to_string(),
            None => continue,
        };

        if name == "doc_avatar" {
            let content_type = field.content_type().unwrap_or_default().to_string();
            let file_name = field
                .file_name()
                .unwrap_or("doc_avatar")
                .to_string();
            let bytes = field.bytes().await.map_err(|_| Error::IncompleteForm)?;

            avatar = Some(AvatarFile {
                file_name,
                content_type,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field.text().await.map_err(|_| Error::IncompleteForm)?;
            fields.insert(name, value);
        }
    }

    let avatar = avatar
        .ok_or(Error::AvatarRequired)
        .tap_err(|_| tracing::debug!("doctor form submitted without avatar"))?;

    let mut take = |key: &str| fields.remove(key).ok_or(Error::IncompleteForm);

    let dob = OffsetDateTime::parse(&take("dob")?, &Rfc3339)
        .map_err(|_| Error::IncompleteForm)?
        .into();

    let gender = match take("gender")?.as_str() {
        "Male" => Gender::Male,
        "Female" => Gender::Female,
        _ => return Err(Error::IncompleteForm),
    };

    let request = CreateDoctorRequest {
        first_name: take("first_name")?,
        last_name: take("last_name")?,
        email: take("email")?,
        phone: take("phone")?,
        nic: take("nic")?,
        dob,
        gender,
        password: take("password")?,
        doctor_department: take("doctor_department")?,
    };

    Ok((request, avatar))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DoctorsResponse {
    pub doctors: Vec<UserResponse>,
}

pub async fn get_all_doctors(
    State(users): State<CredentialStoreHandle>,
) -> Result<Json<DoctorsResponse>, Error> {
    let doctors = users.find_all_by_role(UserRole::Doctor).await?;

    Ok(Json(DoctorsResponse {
        doctors: doctors.into_iter().map(Into::into).collect(),
    }))
}

pub async fn admin_profile(AdminSession(user): AdminSession) -> Json<UserResponse> {
    Json(user.into())
}

pub async fn patient_profile(PatientSession(user): PatientSession) -> Json<UserResponse> {
    Json(user.into())
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct UpdateAccountRequest {
    #[validate(length(min = 8, max = 64, message = "Password Must Contain At Least 8 Characters!"))]
    pub password: Option<String>,

    #[validate(must_match(other = "password", message = "Password & Confirm Password Do Not Match!"))]
    pub confirm_password: Option<String>,
}

#[tracing::instrument(skip_all, fields(id = %account_id))]
pub async fn update_account(
    State(users): State<CredentialStoreHandle>,
    State(argon): State<Argon2<'static>>,
    _session: AdminSession,
    Path(account_id): Path<String>,
    Json(request): Json<UpdateAccountRequest>,
) -> Result<(), Error> {
    request.validate()?;

    let account_id = ObjectId::from_str(&account_id)
        .map_err(|_| Error::NotFound("User"))
        .tap_err(|_| tracing::debug!("tried updating with malformed account id"))?;

    // The Option is the password-changed flag: hashing runs only when a new
    // password was actually submitted, never because of how the stored value
    // looks.
    let password = match request.password {
        Some(password) => Some(hash_password(&argon, &password)?),
        None => None,
    };

    let matched = users.update(account_id, UserUpdate { password }).await?;

    if !matched {
        return Err(Error::NotFound("User"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use assert_matches::assert_matches;
    use axum::{extract::Path, Json};
    use bson::oid::ObjectId;

    use crate::{
        api::v1::{
            avatar::AvatarFile,
            tests::{bootstrap, doctor_request, register_request},
        },
        error::Error,
        util::verify_password,
    };

    use super::UserRole;

    fn avatar_file(content_type: &str) -> AvatarFile {
        AvatarFile {
            file_name: "avatar.png".to_string(),
            content_type: content_type.to_string(),
            bytes: vec![0u8; 16],
        }
    }

    #[tokio::test]
    async fn test_add_new_admin() {
        let bootstrap = bootstrap().await;

        let Json(admin) = super::add_new_admin(
            bootstrap.users(),
            bootstrap.argon(),
            bootstrap.admin_session(),
            Json(register_request("Kyle", "Reese", "kyle@test.com")),
        )
        .await
        .unwrap();

        assert_eq!(admin.role, UserRole::Admin);
        assert!(admin.doctor_department.is_none());
    }

    #[tokio::test]
    async fn test_add_new_admin_duplicate_email() {
        let bootstrap = bootstrap().await;

        let err = super::add_new_admin(
            bootstrap.users(),
            bootstrap.argon(),
            bootstrap.admin_session(),
            Json(register_request("Kyle", "Reese", "example@example.com")),
        )
        .await
        .unwrap_err();

        assert_matches!(err, Error::DuplicateEntry("email"));
    }

    #[tokio::test]
    async fn test_create_doctor() {
        let bootstrap = bootstrap().await;

        let doctor = super::create_doctor(
            bootstrap.app_state.users.clone(),
            bootstrap.app_state.avatars.clone(),
            argon2::Argon2::default(),
            doctor_request("Jane", "Smith", "jane@test.com", "Cardiology"),
            avatar_file("image/png"),
        )
        .await
        .unwrap();

        assert_eq!(doctor.role, UserRole::Doctor);
        assert_eq!(doctor.doctor_department.as_deref(), Some("Cardiology"));
        assert!(doctor.doc_avatar.is_some());
        assert_eq!(bootstrap.memory_avatars.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_doctor_unsupported_avatar_format() {
        let bootstrap = bootstrap().await;

        let err = super::create_doctor(
            bootstrap.app_state.users.clone(),
            bootstrap.app_state.avatars.clone(),
            argon2::Argon2::default(),
            doctor_request("Jane", "Smith", "jane@test.com", "Cardiology"),
            avatar_file("application/pdf"),
        )
        .await
        .unwrap_err();

        assert_matches!(err, Error::UnsupportedFormat);

        // rejected before any store write or upload happened
        assert!(bootstrap
            .memory_users
            .find_by_email_sync("jane@test.com")
            .is_none());
        assert_eq!(bootstrap.memory_avatars.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_all_doctors() {
        let bootstrap = bootstrap().await;

        let _ = super::create_doctor(
            bootstrap.app_state.users.clone(),
            bootstrap.app_state.avatars.clone(),
            argon2::Argon2::default(),
            doctor_request("Jane", "Smith", "jane@test.com", "Cardiology"),
            avatar_file("image/png"),
        )
        .await
        .unwrap();

        let Json(response) = super::get_all_doctors(bootstrap.users()).await.unwrap();

        // the bootstrap admin is not a doctor and must not appear
        assert_eq!(response.doctors.len(), 1);
        assert_eq!(response.doctors[0].email, "jane@test.com");
    }

    #[tokio::test]
    async fn test_profiles_return_session_user() {
        let bootstrap = bootstrap().await;

        let Json(profile) = super::admin_profile(bootstrap.admin_session()).await;
        assert_eq!(profile.id, bootstrap.user_id());

        let patient = bootstrap
            .derive("patient@test.com", "password", UserRole::Patient)
            .await;

        let Json(profile) = super::patient_profile(patient.patient_session()).await;
        assert_eq!(profile.id, patient.user_id());
    }

    #[tokio::test]
    async fn test_update_account_rehashes_changed_password() {
        let bootstrap = bootstrap()
            .await
            .derive("patient@test.com", "password", UserRole::Patient)
            .await;

        let before = bootstrap
            .memory_users
            .get(bootstrap.user_id())
            .unwrap()
            .password;

        super::update_account(
            bootstrap.users(),
            bootstrap.argon(),
            bootstrap.admin_session(),
            Path(bootstrap.user_id().to_string()),
            Json(super::UpdateAccountRequest {
                password: Some("newpassword".to_string()),
                confirm_password: Some("newpassword".to_string()),
            }),
        )
        .await
        .unwrap();

        let after = bootstrap
            .memory_users
            .get(bootstrap.user_id())
            .unwrap()
            .password;

        assert_ne!(before, after);
        assert!(verify_password(
            &argon2::Argon2::default(),
            "newpassword",
            &after
        ));
    }

    #[tokio::test]
    async fn test_update_account_without_password_keeps_hash() {
        let bootstrap = bootstrap()
            .await
            .derive("patient@test.com", "password", UserRole::Patient)
            .await;

        let before = bootstrap
            .memory_users
            .get(bootstrap.user_id())
            .unwrap()
            .password;

        super::update_account(
            bootstrap.users(),
            bootstrap.argon(),
            bootstrap.admin_session(),
            Path(bootstrap.user_id().to_string()),
            Json(super::UpdateAccountRequest {
                password: None,
                confirm_password: None,
            }),
        )
        .await
        .unwrap();

        let after = bootstrap
            .memory_users
            .get(bootstrap.user_id())
            .unwrap()
            .password;

        // no rehash on a write that did not change the password
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_update_account_unknown_id() {
        let bootstrap = bootstrap().await;

        let err = super::update_account(
            bootstrap.users(),
            bootstrap.argon(),
            bootstrap.admin_session(),
            Path(ObjectId::new().to_string()),
            Json(super::UpdateAccountRequest {
                password: None,
                confirm_password: None,
            }),
        )
        .await
        .unwrap_err();

        assert_matches!(err, Error::NotFound("User"));
    }
}
