use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{account::AccountId, coordinator::TxResult};

// Decimals go over the wire as exact JSON numbers.

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountDto {
    pub id: AccountId,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionDto {
    pub from: AccountId,
    pub to: AccountId,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    pub result: TxResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDto {
    pub response_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub cause: String,
}

impl ErrorDto {
    pub fn new(status: StatusCode, cause: impl Into<String>) -> Self {
        Self {
            response_code: status.as_u16(),
            account_id: None,
            code: None,
            cause: cause.into(),
        }
    }

    pub fn with_account(mut self, id: impl Into<AccountId>) -> Self {
        self.account_id = Some(id.into());
        self
    }

    pub fn with_code(mut self, code: impl ToString) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Accounts(Vec<AccountId>),
    Account(AccountDto),
    Transaction(TransactionDto),
    Error(ErrorDto),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: ResponseBody,
}

impl ApiResponse {
    pub fn ok(body: ResponseBody) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn error(error: ErrorDto) -> Self {
        Self {
            status: StatusCode::from_u16(error.response_code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body: ResponseBody::Error(error),
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
