//! HTTP routing of ledger requests.
//!
//! Paths map onto coordinator operations and account reads; this is the
//! only place where result codes are turned into client facing responses.

use std::{any::Any, sync::Arc};

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

use crate::{
    account::AccountReader,
    command::parse_amount,
    coordinator::{DepositResult, TransactionCoordinator, TxResult},
};

pub mod dto;

use dto::{AccountDto, ApiResponse, ErrorDto, ResponseBody, TransactionDto};

/// Path prefix [`ApiV1`] is conventionally mounted under.
pub const V1_PREFIX: &str = "v1";

type Coordinator = dyn TransactionCoordinator + Send + Sync;
type Accounts = dyn AccountReader + Send + Sync;

#[derive(Clone)]
struct ApiState {
    coordinator: Arc<Coordinator>,
    accounts: Arc<Accounts>,
}

/// Version 1 of the ledger API:
///
/// - `/accounts`
/// - `/accounts/{id}`
/// - `/deposit/{id}/{amount}`
/// - `/transfer/{from}/{to}/{amount}`
pub struct ApiV1 {
    state: ApiState,
}

impl ApiV1 {
    pub fn new<C, R>(coordinator: Arc<C>, accounts: Arc<R>) -> Self
    where
        C: TransactionCoordinator + Send + Sync + 'static,
        R: AccountReader + Send + Sync + 'static,
    {
        Self {
            state: ApiState {
                coordinator,
                accounts,
            },
        }
    }

    /// Routes relative to the API prefix. Unknown paths are answered by
    /// [`ApiV1::not_found`].
    pub fn router(self) -> Router {
        Router::new()
            .route("/accounts", get(list_accounts))
            .route("/accounts/:id", get(show_balance))
            .route("/deposit/:id/:amount", get(make_deposit))
            .route("/transfer/:from/:to/:amount", get(make_transfer))
            .fallback(|| async { Self::not_found() })
            .with_state(self.state)
    }

    pub fn not_found() -> ApiResponse {
        ApiResponse::error(ErrorDto::new(StatusCode::NOT_FOUND, "API v1: page not found"))
    }
}

async fn list_accounts(State(api): State<ApiState>) -> ApiResponse {
    ApiResponse::ok(ResponseBody::Accounts(api.accounts.all_accounts()))
}

async fn show_balance(State(api): State<ApiState>, Path(id): Path<String>) -> ApiResponse {
    match api.accounts.balance(&id) {
        Some(balance) => ApiResponse::ok(ResponseBody::Account(AccountDto { id, balance })),
        None => ApiResponse::error(
            ErrorDto::new(StatusCode::NOT_FOUND, "Account not found").with_account(id),
        ),
    }
}

async fn make_deposit(
    State(api): State<ApiState>,
    Path((id, amount)): Path<(String, String)>,
) -> Result<ApiResponse, ApiResponse> {
    let coordinator = Arc::clone(&api.coordinator);
    let account = id.clone();
    let result = blocking(move || coordinator.deposit(&account, parse_amount(&amount))).await?;
    if result != DepositResult::Success {
        return Err(ApiResponse::error(
            ErrorDto::new(StatusCode::CONFLICT, "Deposit error").with_code(result),
        ));
    }

    // read after the lock is gone, concurrent deposits may be included
    match api.accounts.balance(&id) {
        Some(balance) => Ok(ApiResponse::ok(ResponseBody::Account(AccountDto {
            id,
            balance,
        }))),
        None => Err(ApiResponse::error(ErrorDto::new(
            StatusCode::CONFLICT,
            "Account balance retrieval error",
        ))),
    }
}

async fn make_transfer(
    State(api): State<ApiState>,
    Path((from, to, amount)): Path<(String, String, String)>,
) -> Result<ApiResponse, ApiResponse> {
    let amount = parse_amount(&amount);
    let (src, dst) = (from.clone(), to.clone());
    let result = blocking(move || api.coordinator.transfer(&src, &dst, amount)).await?;
    match (result, amount) {
        (TxResult::Success, Some(amount)) => {
            Ok(ApiResponse::ok(ResponseBody::Transaction(TransactionDto {
                from,
                to,
                amount,
                result,
            })))
        }
        _ => Err(ApiResponse::error(
            ErrorDto::new(StatusCode::CONFLICT, "Transfer error").with_code(result),
        )),
    }
}

/// Runs a coordinator call off the async workers, lock waits block.
async fn blocking<T, F>(work: F) -> Result<T, ApiResponse>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        error!(error = %err, "request worker failed");
        internal_error()
    })
}

/// Mounts [`ApiV1`] under an optional base path, e.g. `/api/v1/...`.
pub struct ApiRouter {
    base_path: String,
    v1_prefix: Option<String>,
    v1: ApiV1,
}

impl ApiRouter {
    pub fn new(v1: ApiV1) -> Self {
        Self {
            base_path: String::new(),
            v1_prefix: None,
            v1,
        }
    }

    pub fn base_path(mut self, base_path: &str) -> Self {
        self.base_path = base_path.trim_matches('/').to_owned();
        self
    }

    pub fn enable_v1(mut self, prefix: &str) -> Self {
        self.v1_prefix = Some(prefix.trim_matches('/').to_owned());
        self
    }

    /// Builds the service. Unmatched paths get a JSON 404, and a panicking
    /// handler is answered with a 500.
    pub fn build(self) -> Router {
        let mount: Vec<&str> = match &self.v1_prefix {
            Some(prefix) => [self.base_path.as_str(), prefix.as_str()]
                .into_iter()
                .filter(|segment| !segment.is_empty())
                .collect(),
            None => Vec::new(),
        };
        let app = match (&self.v1_prefix, mount.is_empty()) {
            (None, _) => Router::new().fallback(not_found),
            // mounted at the root, v1 answers every path itself
            (Some(_), true) => self.v1.router(),
            (Some(_), false) => Router::new()
                .nest(&format!("/{}", mount.join("/")), self.v1.router())
                .fallback(not_found),
        };

        app.layer(ServiceBuilder::new().layer(CatchPanicLayer::custom(handle_panic)))
    }
}

async fn not_found() -> ApiResponse {
    ApiResponse::error(ErrorDto::new(StatusCode::NOT_FOUND, "Page not found"))
}

fn internal_error() -> ApiResponse {
    ApiResponse::error(ErrorDto::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
    ))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| err.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");
    error!(detail, "request handler panicked");
    internal_error().into_response()
}
