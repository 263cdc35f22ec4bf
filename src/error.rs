use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Please Fill Full Form!")]
    IncompleteForm,

    #[error("Doctor Avatar Required!")]
    AvatarRequired,

    #[error("Duplicate {0} Entered!")]
    DuplicateEntry(&'static str),

    #[error("{0}")]
    Unauthorized(UnauthorizedType),

    #[error("You have no permission to access this resource")]
    Forbidden,

    #[error("{0} Not Found!")]
    NotFound(&'static str),

    // Several doctor accounts share the submitted name and department; the
    // booking path refuses to guess among them.
    #[error("Doctors Conflict! Please Contact Through Email Or Phone!")]
    DoctorConflict,

    #[error("File Format Not Supported!")]
    UnsupportedFormat,

    #[error("Failed To Upload Doctor Avatar To Asset Host")]
    UploadFailed(anyhow::Error),

    #[error("{0}")]
    PasswordHashError(#[from] password_hash::Error),

    #[error("{0}")]
    DatabaseError(#[from] mongodb::error::Error),

    #[error("{0}")]
    JWTError(#[from] jsonwebtoken::errors::Error),

    #[error("{0}")]
    BSONSerError(#[from] bson::ser::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UnauthorizedType {
    #[error("User Is Not Authenticated!")]
    NotAuthenticated,

    #[error("Session Token Is Invalid, Try Again!")]
    MalformedToken,

    #[error("Session Token Is Expired, Try Again!")]
    ExpiredToken,

    #[error("Invalid Email Or Password!")]
    WrongEmailOrPassword,

    #[error("User Not Found With This Role!")]
    WrongRole,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<serde_json::Value>,
    r#type: String,
    message: String,
}

impl From<Error> for ErrorJson {
    fn from(err: Error) -> Self {
        let message = match &err {
            Error::ValidationError(errors) => collapse_validation_errors(errors),
            _ => err.to_string(),
        };

        let r#type = err.to_string_variant();

        let errors = match err {
            Error::ValidationError(err) => serde_json::to_value(err).ok(),
            Error::IncompleteForm
            | Error::AvatarRequired
            | Error::DuplicateEntry(..)
            | Error::Unauthorized(..)
            | Error::Forbidden
            | Error::NotFound(..)
            | Error::DoctorConflict
            | Error::UnsupportedFormat
            | Error::UploadFailed(..)
            | Error::PasswordHashError(..)
            | Error::DatabaseError(..)
            | Error::JWTError(..)
            | Error::BSONSerError(..) => None,
        };

        Self {
            errors,
            message,
            r#type,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("error: {:?}", self);
        let status = match self {
            Self::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            Self::ValidationError(..) | Self::IncompleteForm | Self::AvatarRequired => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::DuplicateEntry(..) | Self::DoctorConflict => StatusCode::CONFLICT,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(..) => StatusCode::NOT_FOUND,
            Self::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::UploadFailed(..) => StatusCode::BAD_GATEWAY,
            Self::PasswordHashError(..)
            | Self::DatabaseError(..)
            | Self::JWTError(..)
            | Self::BSONSerError(..) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error = ErrorJson::from(self);

        (status, Json(error)).into_response()
    }
}

// Every failed field collapses into a single human-readable message, falling
// back to the constraint code when a field carries no custom message.
fn collapse_validation_errors(errors: &validator::ValidationErrors) -> String {
    let mut messages = vec![];

    for kind in errors.errors().values() {
        if let validator::ValidationErrorsKind::Field(fields) = kind {
            for error in fields {
                match &error.message {
                    Some(message) => messages.push(message.to_string()),
                    None => messages.push(error.code.to_string()),
                }
            }
        }
    }

    messages.join(" ")
}

impl Error {
    pub fn to_string_variant(&self) -> String {
        macro_rules! match_var {
            ($id:ident !) => {
                Self::$id
            };
            ($id:ident (..)) => {
                Self::$id(..)
            };
            ($id:ident {..}) => {
                Self::$id { .. }
            };
        }

        macro_rules! variant {
            ($($name:ident $tt:tt),+) => {
                match self {
                    $(
                        match_var!($name $tt) => {
                            stringify!($name)
                       }
                    )+
                }
            };
        }

        variant! {
            ValidationError(..),
            IncompleteForm!,
            AvatarRequired!,
            DuplicateEntry(..),
            Unauthorized(..),
            Forbidden!,
            NotFound(..),
            DoctorConflict!,
            UnsupportedFormat!,
            UploadFailed(..),
            PasswordHashError(..),
            DatabaseError(..),
            JWTError(..),
            BSONSerError(..)
        }
        .to_string()
    }
}
