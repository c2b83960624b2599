use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0} must unique")]
    MustUniqueError(String),

    #[error("{0}")]
    InvalidQuery(&'static str),

    #[error("{0}")]
    Unauthorized(UnauthorizedType),

    #[error("forbidden access")]
    Forbidden,

    #[error("malformed identifier: {0}")]
    MalformedId(String),

    #[error("{0}")]
    DatabaseError(#[from] mongodb::error::Error),

    #[error("{0}")]
    BSONSerError(#[from] bson::ser::Error),

    #[error("{0}")]
    PaymentProcessor(String),

    #[error("{1}")]
    CustomStr(StatusCode, &'static str),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UnauthorizedType {
    #[error("unauthorized access")]
    MissingToken,

    #[error("unauthorized access: bearer token expected")]
    MalformedHeader,
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
        let message = err.to_string();

        let r#type = err.to_string_variant();

        let errors = match err {
            Error::ValidationError(err) => serde_json::to_value(err).ok(),
            Error::NotFound(..)
            | Error::MustUniqueError(..)
            | Error::InvalidQuery(..)
            | Error::Unauthorized(..)
            | Error::Forbidden
            | Error::MalformedId(..)
            | Error::DatabaseError(..)
            | Error::BSONSerError(..)
            | Error::PaymentProcessor(..)
            | Error::CustomStr(..)
            | Error::Internal(..) => None,
        };

        Self {
            errors,
            message,
            r#type,
        }
    }
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            Self::ValidationError(..) | Self::MustUniqueError(..) | Self::InvalidQuery(..) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(..) => StatusCode::NOT_FOUND,
            Self::MalformedId(..)
            | Self::DatabaseError(..)
            | Self::BSONSerError(..)
            | Self::PaymentProcessor(..)
            | Self::Internal(..) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::CustomStr(code, ..) => *code,
        }
    }

    pub fn to_string_variant(&self) -> String {
        macro_rules! match_var {
            ($id:ident !) => {
                Self::$id
            };
            ($id:ident (..)) => {
                Self::$id(..)
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
            NotFound(..),
            MustUniqueError(..),
            InvalidQuery(..),
            Unauthorized(..),
            Forbidden!,
            MalformedId(..),
            DatabaseError(..),
            BSONSerError(..),
            PaymentProcessor(..),
            CustomStr(..),
            Internal(..)
        }
        .to_string()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("error: {:?}", self);
        let status = self.status();

        let error = ErrorJson::from(self);

        (status, Json(error)).into_response()
    }
}
