//! Demo workload: answers `GET /` with the secret mounted at `$SECRET_PATH`.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use tracing::{error, info};

const PORT: u16 = 1323;

#[derive(Clone)]
struct AppState {
    secret_path: Option<PathBuf>,
}

fn router(state: AppState) -> Router {
    Router::new().route("/", get(show_secret)).with_state(state)
}

async fn show_secret(State(state): State<AppState>) -> (StatusCode, String) {
    match read_secret(&state).await {
        Ok(secret) => (StatusCode::OK, format!("this is my secret: {secret}\n")),
        Err(e) => {
            error!(error = %e, "unable to read secret");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "something went wrong".to_string(),
            )
        }
    }
}

async fn read_secret(state: &AppState) -> std::io::Result<String> {
    let path = state.secret_path.as_ref().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "SECRET_PATH is required")
    })?;
    tokio::fs::read_to_string(path).await
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let state = AppState {
        secret_path: std::env::var_os("SECRET_PATH").map(PathBuf::from),
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], PORT));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_root(state: AppState) -> (StatusCode, String) {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), 1024).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn serves_mounted_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api-key");
        std::fs::write(&path, "xyz").unwrap();

        let (status, body) = get_root(AppState {
            secret_path: Some(path),
        })
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "this is my secret: xyz\n");
    }

    #[tokio::test]
    async fn missing_path_is_a_server_error() {
        let (status, body) = get_root(AppState { secret_path: None }).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "something went wrong");
    }
}
