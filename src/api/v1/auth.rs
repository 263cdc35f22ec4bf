use std::sync::Arc;

use argon2::Argon2;
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts, State},
    headers::{Cookie, Header, SetCookie},
    http::{request::Parts, HeaderValue},
    Json, RequestPartsExt, TypedHeader,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::Validate;

use crate::{
    config::Config,
    error::{Error, UnauthorizedType},
    mongo_ext::Collection,
    util::{hash_password, verify_password, FormattedDateTime, ObjectIdString},
};

use super::{
    avatar::AvatarModel,
    token::{decode_session_token, issue_session_token, JwtState},
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub nic: String,
    pub dob: bson::DateTime,
    pub gender: Gender,
    pub password: String,
    pub role: UserRole,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor_department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_avatar: Option<AvatarModel>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UserRole {
    #[default]
    Patient,
    Doctor,
    Admin,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

/// Fields an account write is allowed to touch after creation. `password`
/// carries an already-hashed replacement; `None` means the password was not
/// part of this write and the stored hash must stay untouched.
#[derive(Debug, Default)]
pub struct UserUpdate {
    pub password: Option<String>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, Error>;

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<UserModel>, Error>;

    async fn find_all_by_role(&self, role: UserRole) -> Result<Vec<UserModel>, Error>;

    /// Exact match on the (first name, last name, department) triple,
    /// restricted to doctor accounts.
    async fn find_all_doctors_by_name_and_department(
        &self,
        first_name: &str,
        last_name: &str,
        department: &str,
    ) -> Result<Vec<UserModel>, Error>;

    async fn insert(&self, user: &UserModel) -> Result<(), Error>;

    /// Returns false when no account matches `id`.
    async fn update(&self, id: ObjectId, update: UserUpdate) -> Result<bool, Error>;
}

#[derive(Clone)]
pub struct CredentialStoreHandle(pub Arc<dyn CredentialStore>);

impl std::ops::Deref for CredentialStoreHandle {
    type Target = dyn CredentialStore;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[derive(Clone)]
pub struct UserCollection(pub Collection<UserModel>);

impl std::ops::Deref for UserCollection {
    type Target = Collection<UserModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl CredentialStore for UserCollection {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, Error> {
        self.find_one(
            bson::doc! {
                "email": email
            },
            None,
        )
        .await
        .map_err(Into::into)
    }

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<UserModel>, Error> {
        self.find_one_by_id(id).await
    }

    async fn find_all_by_role(&self, role: UserRole) -> Result<Vec<UserModel>, Error> {
        self.collect_all(bson::doc! {
            "role": bson::to_bson(&role)?
        })
        .await
    }

    async fn find_all_doctors_by_name_and_department(
        &self,
        first_name: &str,
        last_name: &str,
        department: &str,
    ) -> Result<Vec<UserModel>, Error> {
        self.collect_all(bson::doc! {
            "first_name": first_name,
            "last_name": last_name,
            "role": "Doctor",
            "doctor_department": department,
        })
        .await
    }

    async fn insert(&self, user: &UserModel) -> Result<(), Error> {
        self.insert_one(user, None).await.map(|_| ()).map_err(Into::into)
    }

    async fn update(&self, id: ObjectId, update: UserUpdate) -> Result<bool, Error> {
        let mut set = bson::Document::new();

        if let Some(password) = update.password {
            set.insert("password", password);
        }

        if set.is_empty() {
            return self.find_one_by_id(id).await.map(|it| it.is_some());
        }

        let result = self
            .update_one(
                bson::doc! {
                    "_id": id
                },
                bson::doc! {
                    "$set": set
                },
                None,
            )
            .await?;

        Ok(result.matched_count > 0)
    }
}

/// A role-scoped transport slot for the session token: the cookie that
/// carries it and the single role that carrier admits always travel together.
pub struct SessionCarrier {
    pub cookie_name: &'static str,
    pub role: UserRole,
}

pub const ADMIN_CARRIER: SessionCarrier = SessionCarrier {
    cookie_name: "adminToken",
    role: UserRole::Admin,
};

pub const PATIENT_CARRIER: SessionCarrier = SessionCarrier {
    cookie_name: "patientToken",
    role: UserRole::Patient,
};

pub fn carrier_for(role: UserRole) -> &'static SessionCarrier {
    match role {
        UserRole::Admin => &ADMIN_CARRIER,
        UserRole::Patient | UserRole::Doctor => &PATIENT_CARRIER,
    }
}

/// Pure role gate. Must only run on an already-authenticated identity.
pub fn authorize(user: &UserModel, roles: &[UserRole]) -> Result<(), Error> {
    if roles.contains(&user.role) {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

pub async fn authenticate<S>(
    parts: &mut Parts,
    state: &S,
    carrier: &SessionCarrier,
) -> Result<UserModel, Error>
where
    JwtState: FromRef<S>,
    CredentialStoreHandle: FromRef<S>,
    S: Send + Sync,
{
    let cookie = parts
        .extract::<TypedHeader<Cookie>>()
        .await
        .map_err(|_| Error::Unauthorized(UnauthorizedType::NotAuthenticated))
        .tap_err(|_| tracing::debug!("cookie header not found"))?;

    let token = cookie
        .get(carrier.cookie_name)
        .ok_or_else(|| Error::Unauthorized(UnauthorizedType::NotAuthenticated))
        .tap_err(|_| tracing::debug!("{} cookie not found", carrier.cookie_name))?;

    let jwt_state = JwtState::from_ref(state);
    let token = decode_session_token(&jwt_state, token)
        .map_err(|_| Error::Unauthorized(UnauthorizedType::MalformedToken))?;

    if token.claims.is_expired() {
        return Err(Error::Unauthorized(UnauthorizedType::ExpiredToken));
    }

    // A well-formed token can outlive its account; that is missing
    // authentication, not a token defect.
    let users = CredentialStoreHandle::from_ref(state);
    let user = users
        .find_by_id(token.claims.sub.0)
        .await?
        .ok_or_else(|| Error::Unauthorized(UnauthorizedType::NotAuthenticated))
        .tap_err(|_| tracing::debug!("token subject no longer exists"))?;

    authorize(&user, &[carrier.role])?;

    Ok(user)
}

#[derive(Debug)]
pub struct AdminSession(pub UserModel);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminSession
where
    JwtState: FromRef<S>,
    CredentialStoreHandle: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate(parts, state, &ADMIN_CARRIER).await.map(Self)
    }
}

#[derive(Debug)]
pub struct PatientSession(pub UserModel);

#[axum::async_trait]
impl<S> FromRequestParts<S> for PatientSession
where
    JwtState: FromRef<S>,
    CredentialStoreHandle: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate(parts, state, &PATIENT_CARRIER).await.map(Self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserResponse {
    pub id: ObjectIdString,

    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub nic: String,
    pub dob: FormattedDateTime,
    pub gender: Gender,
    pub role: UserRole,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor_department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_avatar: Option<AvatarModel>,
}

// The password hash never leaves the store layer: there is no field for it
// to land in.
impl From<UserModel> for UserResponse {
    fn from(value: UserModel) -> Self {
        Self {
            id: value.id.into(),

            first_name: value.first_name,
            last_name: value.last_name,
            email: value.email,
            phone: value.phone,
            nic: value.nic,
            dob: value.dob.into(),
            gender: value.gender,
            role: value.role,

            doctor_department: value.doctor_department,
            doc_avatar: value.doc_avatar,
        }
    }
}

#[derive(Validate, Debug, Clone)]
pub struct CreateUserRequest {
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

    #[validate(must_match(other = "password", message = "Password & Confirm Password Do Not Match!"))]
    pub confirm_password: String,

    pub role: UserRole,

    pub doctor_department: Option<String>,

    pub doc_avatar: Option<AvatarModel>,
}

pub async fn create_user(
    users: CredentialStoreHandle,
    argon: Argon2<'_>,
    request: CreateUserRequest,
) -> Result<UserModel, Error> {
    request.validate()?;

    if users.find_by_email(&request.email).await?.is_some() {
        return Err(Error::DuplicateEntry("email"));
    }

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
        role: request.role,
        doctor_department: request.doctor_department,
        doc_avatar: request.doc_avatar,
    };
    users.insert(&model).await?;

    Ok(model)
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct RegisterRequest {
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

    #[validate(must_match(other = "password", message = "Password & Confirm Password Do Not Match!"))]
    pub confirm_password: String,
}

impl RegisterRequest {
    pub fn into_create(self, role: UserRole) -> CreateUserRequest {
        CreateUserRequest {
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            nic: self.nic,
            dob: self.dob,
            gender: self.gender,
            password: self.password,
            confirm_password: self.confirm_password,
            role,
            doctor_department: None,
            doc_avatar: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
}

fn session_cookie(
    carrier: &SessionCarrier,
    token: &str,
    max_age: time::Duration,
) -> TypedHeader<SetCookie> {
    TypedHeader(
        SetCookie::decode(
            &mut [HeaderValue::from_str(&format!(
                "{}={}; HttpOnly; Path=/; Max-Age={}",
                carrier.cookie_name,
                token,
                max_age.whole_seconds(),
            ))
            .unwrap()]
            .as_slice()
            .iter(),
        )
        .unwrap(),
    )
}

fn clear_session_cookie(carrier: &SessionCarrier) -> TypedHeader<SetCookie> {
    session_cookie(carrier, "", time::Duration::ZERO)
}

pub async fn register(
    State(users): State<CredentialStoreHandle>,
    State(argon): State<Argon2<'static>>,
    State(jwt_state): State<JwtState>,
    State(config): State<Config>,
    Json(request): Json<RegisterRequest>,
) -> Result<(TypedHeader<SetCookie>, Json<AuthResponse>), Error> {
    let user = create_user(users, argon, request.into_create(UserRole::Patient)).await?;

    let token = issue_session_token(&jwt_state, user.id)?;
    let cookie = session_cookie(carrier_for(user.role), &token, config.cookie_ttl);

    Ok((
        cookie,
        Json(AuthResponse {
            user: user.into(),
            token,
        }),
    ))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    #[validate(email(message = "Provide A Valid Email!"))]
    pub email: String,

    #[validate(length(min = 1, message = "Please Fill Full Form!"))]
    pub password: String,

    #[validate(must_match(other = "password", message = "Password & Confirm Password Do Not Match!"))]
    pub confirm_password: String,

    pub role: UserRole,
}

pub async fn login(
    State(users): State<CredentialStoreHandle>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    State(config): State<Config>,
    Json(request): Json<LoginRequest>,
) -> Result<(TypedHeader<SetCookie>, Json<AuthResponse>), Error> {
    // Mismatching confirmation must fail before any store lookup happens.
    request.validate()?;

    let user = users.find_by_email(&request.email).await?;

    let user = match user {
        Some(user) if verify_password(&argon, &request.password, &user.password) => user,
        _ => {
            return Err(Error::Unauthorized(
                UnauthorizedType::WrongEmailOrPassword,
            ))
        }
    };

    // Never fall back to the stored role: logging a Patient in through a
    // Doctor login form is a refusal, not a downgrade.
    if user.role != request.role {
        return Err(Error::Unauthorized(UnauthorizedType::WrongRole))
            .tap_err(|_| tracing::debug!("submitted role does not match stored role"));
    }

    let token = issue_session_token(&jwt_state, user.id)?;
    let cookie = session_cookie(carrier_for(user.role), &token, config.cookie_ttl);

    Ok((
        cookie,
        Json(AuthResponse {
            user: user.into(),
            token,
        }),
    ))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LogoutResponse {
    pub message: String,
}

// Logout only clears the client-visible carrier. Tokens are stateless, so an
// already issued token stays verifiable until its natural expiry.
pub async fn logout_admin(
    AdminSession(_): AdminSession,
) -> (TypedHeader<SetCookie>, Json<LogoutResponse>) {
    (
        clear_session_cookie(&ADMIN_CARRIER),
        Json(LogoutResponse {
            message: "Admin Logged Out Successfully.".to_string(),
        }),
    )
}

pub async fn logout_patient(
    PatientSession(_): PatientSession,
) -> (TypedHeader<SetCookie>, Json<LogoutResponse>) {
    (
        clear_session_cookie(&PATIENT_CARRIER),
        Json(LogoutResponse {
            message: "Patient Logged Out Successfully.".to_string(),
        }),
    )
}
