use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::state::AppState;
use crate::storage::PUBLIC_PREFIX;
use crate::{auth, users};

pub fn build_app(state: AppState) -> Router {
    let uploads = ServeDir::new(&state.config.upload_dir);
    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .merge(users::router())
                .route("/health", get(|| async { "ok" })),
        )
        .nest_service(PUBLIC_PREFIX, uploads)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "3001".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        auth::github::{fake::FakeProvider, ProviderProfile},
        users::avatar::samples,
    };

    fn octocat() -> ProviderProfile {
        ProviderProfile {
            provider_user_id: 583231,
            login: "octocat".into(),
            email: Some("octocat@github.com".into()),
            avatar_url: Some("https://avatars.githubusercontent.com/u/583231".into()),
        }
    }

    fn app(dir: &tempfile::TempDir) -> Router {
        let state = AppState::fake(dir.path(), Arc::new(FakeProvider::new("good", octocat())));
        build_app(state)
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        req.body(Body::empty()).unwrap()
    }

    async fn body_json(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register(app: &Router, name: &str) -> String {
        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({
                    "username": name,
                    "email": format!("{name}@example.com"),
                    "password": "Str0ng!pass",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        body_json(res).await["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health() {
        let dir = tempfile::tempdir().unwrap();
        let res = app(&dir).oneshot(get("/api/health", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_login_and_me() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        let token = register(&app, "alice").await;

        let res = app.clone().oneshot(get("/api/auth/me", Some(&token))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let me = body_json(res).await;
        assert_eq!(me["username"], "alice");
        assert!(me.get("password_hash").is_none());

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/login",
                None,
                json!({ "email": "ALICE@example.com", "password": "Str0ng!pass" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["user"]["email"], "alice@example.com");
    }

    #[tokio::test]
    async fn bad_credentials_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        register(&app, "alice").await;

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/login",
                None,
                json!({ "email": "alice@example.com", "password": "Wr0ng!pass" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["error"], "Invalid credentials");

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({
                    "username": "alice2",
                    "email": "alice@example.com",
                    "password": "Str0ng!pass",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({ "username": "x", "email": "nope", "password": "weak" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = body_json(res).await;
        assert_eq!(body["error"], "Validation Error");
        assert_eq!(body["details"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_and_bad_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        for req in [
            get("/api/auth/me", None),
            get("/api/auth/me", Some("not-a-jwt")),
            get("/api/users/profile", None),
        ] {
            let res = app.clone().oneshot(req).await.unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_json(res).await["error"], "Unauthorized");
        }
    }

    #[tokio::test]
    async fn github_callback_redirects() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let location = |res: &Response| {
            res.headers()[header::LOCATION]
                .to_str()
                .unwrap()
                .to_string()
        };

        let res = app
            .clone()
            .oneshot(get("/api/auth/github/callback", None))
            .await
            .unwrap();
        assert!(res.status().is_redirection());
        assert_eq!(location(&res), "http://localhost:5173/login?error=missing_code");

        let res = app
            .clone()
            .oneshot(get("/api/auth/github/callback?code=bad", None))
            .await
            .unwrap();
        assert_eq!(
            location(&res),
            "http://localhost:5173/login?error=github_auth_failed"
        );

        let res = app
            .clone()
            .oneshot(get("/api/auth/github/callback?code=a&code=b", None))
            .await
            .unwrap();
        assert!(res.status().is_redirection());
        assert_eq!(
            location(&res),
            "http://localhost:5173/login?error=github_auth_failed"
        );

        let res = app
            .clone()
            .oneshot(get("/api/auth/github/callback?code=good", None))
            .await
            .unwrap();
        let target = location(&res);
        let token = target
            .strip_prefix("http://localhost:5173/auth/callback?token=")
            .unwrap();

        let res = app.clone().oneshot(get("/api/auth/me", Some(token))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let me = body_json(res).await;
        assert_eq!(me["username"], "octocat");
        assert_eq!(me["github_id"], 583231);
    }

    #[tokio::test]
    async fn profile_update_json_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        let token = register(&app, "alice").await;

        let res = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/users/profile",
                Some(&token),
                json!({ "username": "alice_renamed" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["username"], "alice_renamed");

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/users/profile")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["message"], "User deleted successfully");

        // The token outlives the account but no longer resolves.
        let res = app.clone().oneshot(get("/api/auth/me", Some(&token))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn multipart_avatar_is_stored_and_served() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        let token = register(&app, "alice").await;

        let boundary = "X-BOUNDARY";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"username\"\r\n\r\nalice_pic\r\n\
                 --{boundary}\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"me.png\"\r\n\
                 Content-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(samples::PNG);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/users/profile")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let view = body_json(res).await;
        assert_eq!(view["username"], "alice_pic");
        let avatar = view["avatar"].as_str().unwrap().to_string();
        assert!(avatar.starts_with("/uploads/avatar-") && avatar.ends_with(".png"));

        let res = app.clone().oneshot(get(&avatar, None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let served = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&served[..], samples::PNG);
    }
}
