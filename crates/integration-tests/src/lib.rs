//! Integration test harness for the Plantorium client.
//!
//! [`FakeBackend`] is an in-process axum server on `127.0.0.1:0` that speaks
//! the backend's envelope protocol:
//!
//! - `POST /api/v2/auth/refresh-token` - rotates the token pair, optionally
//!   after a delay or failing with 403
//! - `/api/v2/user/carts` - one user's cart (GET, POST, PATCH/DELETE by line)
//! - `GET /api/v2/checkout/summary` - echoes, and records, the
//!   `Authorization` header
//!
//! Cart routes answer 401 `TOKEN_EXPIRED` unless the request carries the
//! currently valid access token.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p plantorium-integration-tests
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use plantorium_client::{
    AuthenticatedHttpClient, CartReconciler, ClientConfig, HttpRefresher, PersistenceAdapter,
    TokenCoordinator,
};
use plantorium_core::{CredentialPair, UnitPricing};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use url::Url;

type Reply = (StatusCode, Json<Value>);

/// A line in the fake server cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLine {
    pub id: String,
    pub product: String,
    pub quantity: u32,
}

#[derive(Default)]
struct BackendState {
    generation: AtomicUsize,
    access_token: Mutex<Option<String>>,
    refresh_token: Mutex<String>,
    refresh_calls: AtomicUsize,
    refresh_delay: Mutex<Duration>,
    fail_refresh: AtomicBool,
    catalog: Mutex<HashMap<String, (Decimal, Decimal)>>,
    out_of_stock: Mutex<HashSet<String>>,
    cart: Mutex<Vec<ServerLine>>,
    next_line: AtomicUsize,
    cart_requests: AtomicUsize,
    checkout_authorization: Mutex<Option<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BackendState {
    fn pair(generation: usize) -> (String, String) {
        (format!("access-{generation}"), format!("refresh-{generation}"))
    }

    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .and_then(|rest| rest.split_whitespace().next());
        let valid = lock(&self.access_token);
        matches!((presented, valid.as_deref()), (Some(p), Some(v)) if p == v)
    }

    fn line_json(&self, line: &ServerLine) -> Value {
        let (price, discount) = lock(&self.catalog)
            .get(&line.product)
            .copied()
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));
        json!({
            "_id": line.id,
            "plant": {
                "_id": line.product,
                "pricing": UnitPricing::from_list_price(price, discount).unwrap_or_default(),
            },
            "quantity": line.quantity,
        })
    }
}

fn ok(result: Value) -> Reply {
    (StatusCode::OK, Json(json!({ "status": true, "result": result })))
}

fn failure(status: StatusCode, message: &str) -> Reply {
    (status, Json(json!({ "status": false, "message": message })))
}

fn expired() -> Reply {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "status": false, "code": "TOKEN_EXPIRED", "message": "jwt expired" })),
    )
}

async fn refresh_token(State(state): State<Arc<BackendState>>, Json(body): Json<Value>) -> Reply {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = *lock(&state.refresh_delay);
    tokio::time::sleep(delay).await;

    let presented = body.get("refreshToken").and_then(Value::as_str);
    if state.fail_refresh.load(Ordering::SeqCst)
        || presented != Some(lock(&state.refresh_token).as_str())
    {
        return failure(StatusCode::FORBIDDEN, "Authentication Failed!");
    }

    let generation = state.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let (access, refresh) = BackendState::pair(generation);
    *lock(&state.access_token) = Some(access.clone());
    *lock(&state.refresh_token) = refresh.clone();

    (
        StatusCode::OK,
        Json(json!({
            "status": true,
            "message": "Token refreshed",
            "token": { "accessToken": access, "refreshToken": refresh },
        })),
    )
}

async fn list_cart(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Reply {
    state.cart_requests.fetch_add(1, Ordering::SeqCst);
    if !state.is_authorized(&headers) {
        return expired();
    }
    let lines: Vec<Value> = lock(&state.cart).iter().map(|l| state.line_json(l)).collect();
    ok(Value::Array(lines))
}

async fn add_to_cart(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    state.cart_requests.fetch_add(1, Ordering::SeqCst);
    if !state.is_authorized(&headers) {
        return expired();
    }

    let product = body.get("plant").and_then(Value::as_str).unwrap_or_default().to_string();
    let quantity = body
        .get("quantity")
        .and_then(Value::as_u64)
        .and_then(|q| u32::try_from(q).ok())
        .unwrap_or(0);

    if lock(&state.out_of_stock).contains(&product) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": false,
                "code": "OUT_OF_STOCK",
                "message": format!("{product} is out of stock"),
            })),
        );
    }
    if !lock(&state.catalog).contains_key(&product) {
        return failure(StatusCode::NOT_FOUND, "Plant not found");
    }
    if quantity == 0 {
        return failure(StatusCode::BAD_REQUEST, "Quantity must be at least 1");
    }

    let line = {
        let mut cart = lock(&state.cart);
        if let Some(line) = cart.iter_mut().find(|l| l.product == product) {
            line.quantity += quantity;
            line.clone()
        } else {
            let id = format!("cart-{}", state.next_line.fetch_add(1, Ordering::SeqCst) + 1);
            let line = ServerLine {
                id,
                product,
                quantity,
            };
            cart.push(line.clone());
            line
        }
    };
    ok(state.line_json(&line))
}

async fn update_line(
    State(state): State<Arc<BackendState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    state.cart_requests.fetch_add(1, Ordering::SeqCst);
    if !state.is_authorized(&headers) {
        return expired();
    }
    let Some(quantity) = body
        .get("quantity")
        .and_then(Value::as_u64)
        .and_then(|q| u32::try_from(q).ok())
    else {
        return failure(StatusCode::BAD_REQUEST, "Quantity is required");
    };

    let line = {
        let mut cart = lock(&state.cart);
        let Some(line) = cart.iter_mut().find(|l| l.id == id) else {
            return failure(StatusCode::NOT_FOUND, "Cart item not found");
        };
        line.quantity = quantity;
        line.clone()
    };
    ok(state.line_json(&line))
}

async fn delete_line(
    State(state): State<Arc<BackendState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Reply {
    state.cart_requests.fetch_add(1, Ordering::SeqCst);
    if !state.is_authorized(&headers) {
        return expired();
    }
    let mut cart = lock(&state.cart);
    let before = cart.len();
    cart.retain(|l| l.id != id);
    if cart.len() == before {
        return failure(StatusCode::NOT_FOUND, "Cart item not found");
    }
    ok(json!({ "_id": id }))
}

async fn checkout_summary(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Reply {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    lock(&state.checkout_authorization).clone_from(&header);
    ok(json!({ "authorization": header }))
}

/// In-process fake of the Plantorium backend.
pub struct FakeBackend {
    url: Url,
    state: Arc<BackendState>,
    server: JoinHandle<()>,
}

impl FakeBackend {
    /// Start the server on an ephemeral port. The first issued session is
    /// `access-0` / `refresh-0`.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    #[allow(clippy::expect_used)]
    pub async fn start() -> Self {
        let state = Arc::new(BackendState::default());
        let (access, refresh) = BackendState::pair(0);
        *lock(&state.access_token) = Some(access);
        *lock(&state.refresh_token) = refresh;

        let app = Router::new()
            .route("/api/v2/auth/refresh-token", post(refresh_token))
            .route("/api/v2/user/carts", get(list_cart).post(add_to_cart))
            .route("/api/v2/user/carts/{id}", patch(update_line).delete(delete_line))
            .route("/api/v2/checkout/summary", get(checkout_summary))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake backend");
        let addr = listener.local_addr().expect("local address");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let url = Url::parse(&format!("http://{addr}")).expect("backend URL");
        Self { url, state, server }
    }

    /// Base URL of the running server.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Client configuration pointing at this server.
    #[must_use]
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.url.clone())
            .with_request_timeout(Duration::from_secs(5))
            .with_refresh_timeout(Duration::from_secs(2))
    }

    /// The token pair the server currently accepts.
    ///
    /// # Panics
    ///
    /// Panics if no access token is currently valid.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn session(&self) -> CredentialPair {
        let access = lock(&self.state.access_token)
            .clone()
            .expect("an access token is valid");
        let refresh = lock(&self.state.refresh_token).clone();
        CredentialPair::new(access, refresh).expect("non-empty tokens")
    }

    /// List `product` in the catalog.
    pub fn add_product(&self, product: &str, price: Decimal, discount: Decimal) {
        lock(&self.state.catalog).insert(product.to_string(), (price, discount));
    }

    /// Reject adds of `product` with `OUT_OF_STOCK`.
    pub fn mark_out_of_stock(&self, product: &str) {
        lock(&self.state.out_of_stock).insert(product.to_string());
    }

    /// Stop accepting the current access token until the next refresh.
    pub fn expire_access_token(&self) {
        *lock(&self.state.access_token) = None;
    }

    /// Make every refresh call answer 403.
    pub fn fail_refresh(&self) {
        self.state.fail_refresh.store(true, Ordering::SeqCst);
    }

    /// Hold every refresh call for `delay` before answering.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *lock(&self.state.refresh_delay) = delay;
    }

    /// Refresh calls received so far.
    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    /// Cart requests received so far, including rejected ones.
    #[must_use]
    pub fn cart_requests(&self) -> usize {
        self.state.cart_requests.load(Ordering::SeqCst)
    }

    /// The server cart.
    #[must_use]
    pub fn cart(&self) -> Vec<ServerLine> {
        lock(&self.state.cart).clone()
    }

    /// The `Authorization` header of the last checkout request.
    #[must_use]
    pub fn checkout_authorization(&self) -> Option<String> {
        lock(&self.state.checkout_authorization).clone()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Build the full cart stack against `backend`.
///
/// # Panics
///
/// Panics if the HTTP client cannot be built.
#[must_use]
#[allow(clippy::expect_used)]
pub fn connect(backend: &FakeBackend, storage: Arc<dyn PersistenceAdapter>) -> CartReconciler {
    plantorium_client::connect(&backend.config(), storage).expect("client stack")
}

/// Build just the request pipeline against `backend`.
///
/// # Panics
///
/// Panics if the refresh endpoint URL cannot be built.
#[must_use]
#[allow(clippy::expect_used)]
pub fn pipeline(
    backend: &FakeBackend,
    storage: Arc<dyn PersistenceAdapter>,
) -> (Arc<TokenCoordinator>, AuthenticatedHttpClient) {
    let config = backend.config();
    let http = reqwest::Client::new();
    let refresher = HttpRefresher::new(http.clone(), backend.url()).expect("refresh endpoint");
    let coordinator = Arc::new(TokenCoordinator::new(
        storage,
        Arc::new(refresher),
        config.refresh_timeout,
    ));
    let client = AuthenticatedHttpClient::new(http, backend.url().clone(), Arc::clone(&coordinator));
    (coordinator, client)
}
