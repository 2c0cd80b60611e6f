//! HTTP server for the payout façade.
//!
//! Exposes token queries, NFT minting and NFT contract deployment as JSON
//! endpoints under `/api`.

use alloy::primitives::{Address, B256, U256};
use axum::{
	extract::{Path, Query, State},
	http::StatusCode,
	response::{IntoResponse, Json, Response},
	routing::{get, post},
	Router,
};
use payout_config::ApiConfig;
use payout_core::{DeployedContract, ManagerError, PayoutFacade};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub facade: Arc<PayoutFacade>,
}

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
}

/// Request failures with their HTTP status mapping.
#[derive(Debug, Error)]
pub enum ApiError {
	#[error("Bad Request: {0}")]
	BadRequest(String),
	#[error("Not Found: {0}")]
	NotFound(String),
	#[error("Bad Gateway: {0}")]
	Upstream(String),
	#[error("Internal Server Error: {0}")]
	Internal(String),
}

impl ApiError {
	fn parts(&self) -> (StatusCode, &'static str, &str) {
		match self {
			ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", m),
			ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "NOT_FOUND", m),
			ApiError::Upstream(m) => (StatusCode::BAD_GATEWAY, "CHAIN_ERROR", m),
			ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", m),
		}
	}
}

impl From<ManagerError> for ApiError {
	fn from(e: ManagerError) -> Self {
		let message = e.to_string();
		match e {
			ManagerError::UnknownChain(_) => ApiError::NotFound(message),
			ManagerError::InvalidReward(_) | ManagerError::Config(_) => ApiError::BadRequest(message),
			ManagerError::Delivery(_) | ManagerError::Dispatch(_) => ApiError::Upstream(message),
			ManagerError::Repository(_) | ManagerError::Storage(_) | ManagerError::Watcher(_) => {
				ApiError::Internal(message)
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, error, message) = self.parts();
		let body = ErrorResponse {
			error: error.to_string(),
			message: message.to_string(),
		};
		(status, Json(body)).into_response()
	}
}

/// Token amounts travel as decimal strings.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
	pub balance: String,
}

#[derive(Debug, Deserialize)]
pub struct Erc1155BalanceQuery {
	pub token_id: String,
	pub contract: Option<Address>,
}

#[derive(Debug, Deserialize)]
pub struct MintRequest {
	pub community_id: String,
	pub chain: String,
	pub nft_id: String,
	#[serde(default)]
	pub recipient: Option<Address>,
	pub amount: String,
	#[serde(default)]
	pub metadata_ref: String,
}

#[derive(Debug, Serialize)]
pub struct MintResponse {
	pub transaction_id: String,
	pub tx_hash: B256,
}

fn parse_u256(field: &str, value: &str) -> Result<U256, ApiError> {
	U256::from_str(value.trim())
		.map_err(|e| ApiError::BadRequest(format!("Invalid {} '{}': {}", field, value, e)))
}

/// Builds the `/api` router over the façade.
pub fn router(facade: Arc<PayoutFacade>) -> Router {
	Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/chains/{chain}/erc20/{token}", get(handle_erc20_info))
				.route(
					"/chains/{chain}/erc20/{token}/balance/{account}",
					get(handle_erc20_balance),
				)
				.route(
					"/chains/{chain}/erc1155/balance/{account}",
					get(handle_erc1155_balance),
				)
				.route("/chains/{chain}/nft/deploy", post(handle_deploy))
				.route("/nft/mint", post(handle_mint)),
		)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive()),
		)
		.with_state(AppState { facade })
}

/// Serves the API until `shutdown` flips.
pub async fn start_server(
	api_config: ApiConfig,
	facade: Arc<PayoutFacade>,
	mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Payout API server starting on {}", bind_address);

	axum::serve(listener, router(facade))
		.with_graceful_shutdown(async move {
			let _ = shutdown.changed().await;
		})
		.await
}

/// Handles GET /api/chains/{chain}/erc20/{token}.
async fn handle_erc20_info(
	Path((chain, token)): Path<(String, Address)>,
	State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
	let info = state
		.facade
		.erc20_token_info(&chain, token)
		.await
		.inspect_err(|e| tracing::warn!(chain = %chain, token = %token, error = %e, "Token info request failed"))?;
	Ok(Json(info))
}

async fn handle_erc20_balance(
	Path((chain, token, account)): Path<(String, Address, Address)>,
	State(state): State<AppState>,
) -> Result<Json<BalanceResponse>, ApiError> {
	let balance = state
		.facade
		.erc20_balance_of(&chain, token, account)
		.await?;
	Ok(Json(BalanceResponse {
		balance: balance.to_string(),
	}))
}

/// Handles GET /api/chains/{chain}/erc1155/balance/{account}.
///
/// `contract` defaults to the chain's reward NFT contract.
async fn handle_erc1155_balance(
	Path((chain, account)): Path<(String, Address)>,
	Query(query): Query<Erc1155BalanceQuery>,
	State(state): State<AppState>,
) -> Result<Json<BalanceResponse>, ApiError> {
	let token_id = parse_u256("token_id", &query.token_id)?;
	let balance = state
		.facade
		.erc1155_balance_of(&chain, query.contract, account, token_id)
		.await?;
	Ok(Json(BalanceResponse {
		balance: balance.to_string(),
	}))
}

/// Handles POST /api/nft/mint.
async fn handle_mint(
	State(state): State<AppState>,
	Json(request): Json<MintRequest>,
) -> Result<Json<MintResponse>, ApiError> {
	let amount = parse_u256("amount", &request.amount)?;
	match state
		.facade
		.mint_nft(
			&request.community_id,
			&request.chain,
			&request.nft_id,
			request.recipient,
			amount,
			&request.metadata_ref,
		)
		.await
	{
		Ok(outcome) => Ok(Json(MintResponse {
			transaction_id: outcome.transaction_id,
			tx_hash: outcome.tx_hash,
		})),
		Err(e) => {
			tracing::warn!("Mint request failed: {}", e);
			Err(ApiError::from(e))
		},
	}
}

/// Handles POST /api/chains/{chain}/nft/deploy.
async fn handle_deploy(
	Path(chain): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<DeployedContract>, ApiError> {
	match state.facade.deploy_nft_contract(&chain).await {
		Ok(deployed) => Ok(Json(deployed)),
		Err(e) => {
			tracing::warn!("Deploy request failed: {}", e);
			Err(ApiError::from(e))
		},
	}
}
