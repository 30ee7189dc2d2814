use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use podgate_core::{Command, CommandGateway, CommandParams, Envelope, GatewayError};
use tower_http::trace::TraceLayer;
use tracing::error;

pub type SharedGateway = Arc<CommandGateway>;

pub fn router(gateway: SharedGateway) -> Router {
    Command::ALL
        .into_iter()
        .fold(Router::new(), |router, command| {
            router.route(
                command.path(),
                get(
                    move |State(gateway): State<SharedGateway>,
                          Query(params): Query<HashMap<String, String>>| {
                        run_command(gateway, command, params)
                    },
                ),
            )
        })
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

async fn run_command(
    gateway: SharedGateway,
    command: Command,
    params: HashMap<String, String>,
) -> Json<Envelope> {
    let params = CommandParams::new(params);
    let envelope = match tokio::task::spawn_blocking(move || gateway.execute(command, &params)).await {
        Ok(envelope) => envelope,
        Err(err) => {
            error!(command = command.name(), error = %err, "command worker did not complete");
            Envelope::from_result(
                command,
                Err(GatewayError::Unexpected(format!("worker task failed: {}", err))),
            )
        }
    };
    Json(envelope)
}
