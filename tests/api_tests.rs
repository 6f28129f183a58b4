//! HTTP API tests
//!
//! Each test builds its own state under a fresh temp root and drives the
//! router in-process, carrying the session cookie between calls.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, SET_COOKIE};
    use axum::http::{Method, Request, StatusCode};
    use axum::response::Response;
    use axum::Router;
    use boursa::auth::{hash_password, Role};
    use boursa::cache::{Cache, MemoryCache};
    use boursa::config::{AppConfig, Profile};
    use boursa::dataset::DataFrame;
    use boursa::forecast::{train, ModelKind};
    use boursa::stock::{FetchRequest, QuoteProvider, StockApiError, StockApiService};
    use boursa::types::Provider;
    use boursa::web::{create_router, AppState};
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "boursa-test-boundary";

    struct TestApp {
        router: Router,
        state: AppState,
        root: PathBuf,
        cookie: Option<String>,
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("boursa_api_{}", uuid::Uuid::new_v4()))
    }

    fn testing_config(root: &PathBuf) -> AppConfig {
        AppConfig::for_profile(Profile::Testing, root).unwrap()
    }

    impl TestApp {
        fn from_state(state: AppState, root: PathBuf) -> Self {
            Self {
                router: create_router(state.clone()),
                state,
                root,
                cookie: None,
            }
        }

        async fn new() -> Self {
            Self::with_config(|_| {}).await
        }

        async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
            let root = temp_root();
            let mut config = testing_config(&root);
            configure(&mut config);
            let state = AppState::build(config).await.unwrap();
            Self::from_state(state, root)
        }

        async fn send(&mut self, mut req: Request<Body>) -> Response {
            if let Some(cookie) = &self.cookie {
                req.headers_mut().insert(COOKIE, cookie.parse().unwrap());
            }
            let response = self.router.clone().oneshot(req).await.unwrap();
            if let Some(value) = response.headers().get(SET_COOKIE) {
                let raw = value.to_str().unwrap();
                self.cookie = raw.split(';').next().map(str::to_string);
            }
            response
        }

        async fn json(&mut self, req: Request<Body>) -> (StatusCode, Value) {
            let response = self.send(req).await;
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }

        async fn get(&mut self, uri: &str) -> (StatusCode, Value) {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            self.json(req).await
        }

        async fn post(&mut self, uri: &str, body: Value) -> (StatusCode, Value) {
            let req = Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            self.json(req).await
        }

        async fn upload(&mut self, filename: &str, content_type: &str, bytes: &[u8]) -> (StatusCode, Value) {
            let req = multipart_request("/upload_file", "data_file", filename, content_type, bytes);
            self.json(req).await
        }

        async fn login(&mut self, username: &str, password: &str) -> StatusCode {
            let (status, _) = self
                .post("/auth/login", json!({ "username": username, "password": password }))
                .await;
            status
        }
    }

    impl Drop for TestApp {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    fn multipart_request(
        uri: &str,
        field: &str,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, field, filename, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn paired_csv() -> String {
        let mut csv = String::from("a,b,group\n");
        for i in 0..20 {
            let a = i as f64 * 1.5 + (i % 3) as f64;
            let b = i as f64 * 0.8 + 2.0;
            let group = if i % 2 == 0 { "x" } else { "y" };
            csv.push_str(&format!("{},{},{}\n", a, b, group));
        }
        csv
    }

    fn price_csv(rows: usize) -> String {
        let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut csv = String::from("Date,Close\n");
        for i in 0..rows {
            let date = start + chrono::Duration::days(i as i64);
            let close = 100.0 + i as f64 * 0.5 + (i % 7) as f64;
            csv.push_str(&format!("{},{}\n", date.format("%Y-%m-%d"), close));
        }
        csv
    }

    // ==================== Health & Caching ====================

    #[tokio::test]
    async fn test_health_reports_profile_and_sets_session_cookie() {
        let mut app = TestApp::new().await;
        let (status, body) = app.get("/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["profile"], "testing");
        assert!(app.cookie.as_deref().unwrap().starts_with("boursa_session="));
    }

    #[tokio::test]
    async fn test_static_files_are_cached_and_json_is_not() {
        let mut app = TestApp::new().await;
        std::fs::create_dir_all(app.root.join("static")).unwrap();
        std::fs::write(app.root.join("static/app.css"), "body { margin: 0; }").unwrap();

        let req = Request::builder().uri("/static/app.css").body(Body::empty()).unwrap();
        let response = app.send(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CACHE_CONTROL).unwrap(),
            "public, max-age=31536000"
        );

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.send(req).await;
        assert!(response.headers().get(CACHE_CONTROL).is_none());
    }

    #[tokio::test]
    async fn test_pages_have_no_cache_control() {
        let mut app = TestApp::new().await;
        for uri in ["/", "/accueil", "/description"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let response = app.send(req).await;
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
            assert!(response.headers().get(CACHE_CONTROL).is_none(), "{}", uri);
        }
    }

    // ==================== Upload ====================

    #[tokio::test]
    async fn test_upload_csv_loads_session_dataset() {
        let mut app = TestApp::new().await;
        let (status, body) = app.upload("data.csv", "text/csv", paired_csv().as_bytes()).await;

        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["success"], true);
        assert_eq!(body["filename"], "data.csv");
        assert_eq!(body["rows"], 20);
        assert_eq!(body["columns"], json!(["a", "b", "group"]));
        assert_eq!(body["preview"].as_array().unwrap().len(), 5);
        assert!(app.root.join("uploads/data.csv").exists());

        let (status, body) = app.get("/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_file"], "data.csv");
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_files() {
        let mut app = TestApp::new().await;

        let (status, body) = app.upload("notes.txt", "text/plain", b"a,b\n1,2\n").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "File type not allowed");

        let (status, body) = app.upload("data.csv", "text/csv", b"a,b\x00\x00\x01\x02\n").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "File type/MIME not allowed");

        let (status, body) = app.upload("data.csv", "image/png", b"a,b\n1,2\n").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "File type/MIME not allowed");

        let (status, body) = app.upload("empty.csv", "text/csv", b"").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "File is empty or contains no valid data");
        assert!(!app.root.join("uploads/empty.csv").exists());
    }

    #[tokio::test]
    async fn test_upload_over_body_limit_is_rejected() {
        let mut app = TestApp::with_config(|c| c.upload.max_content_length = 1024).await;
        let big = "a,b\n".to_string() + &"1,2\n".repeat(1000);

        let (status, body) = app.upload("big.csv", "text/csv", big.as_bytes()).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_clear_session_file_forgets_dataset() {
        let mut app = TestApp::new().await;
        app.upload("data.csv", "text/csv", paired_csv().as_bytes()).await;

        let (status, _) = app.post("/clear_session_file", json!({})).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.get("/visualisation/summary").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Please load a data file first.");
    }

    // ==================== Statistical Tests & History ====================

    #[tokio::test]
    async fn test_run_test_without_file_is_rejected() {
        let mut app = TestApp::new().await;
        let (status, body) = app
            .post("/tests/run", json!({ "test": "spearman", "columns": ["a", "b"] }))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_run_test_records_history_and_downloads() {
        let mut app = TestApp::new().await;
        app.upload("data.csv", "text/csv", paired_csv().as_bytes()).await;

        let (status, body) = app
            .post("/tests/run", json!({ "test": "spearman", "columns": ["a", "b"] }))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert!(body["result"]["p_value"].is_number());

        let (status, body) = app
            .post("/tests/run", json!({ "test": "spearman", "columns": ["a", "missing"] }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

        let (_, body) = app.get("/historique").await;
        assert_eq!(body["history"]["total"], 1);
        assert_eq!(body["history"]["page"], 1);

        let req = Request::builder()
            .uri("/resultats/download_last_result")
            .body(Body::empty())
            .unwrap();
        let response = app.send(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers().get(CONTENT_DISPOSITION).unwrap().to_str().unwrap();
        assert!(disposition.contains("resultat_spearman_"));

        let req = Request::builder()
            .uri("/resultats/download_history?format=csv")
            .body(Body::empty())
            .unwrap();
        let response = app.send(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/csv"));

        let (status, _) = app.get("/resultats/download_history?format=xml").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app.post("/historique/clear", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = app.get("/resultats/download_history").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "No history to download.");
        let (status, _) = app.get("/resultats/download_last_result").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_available_tests_are_listed() {
        let mut app = TestApp::new().await;
        let (status, body) = app.get("/tests/available").await;

        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body["tests"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["id"].as_str())
            .collect();
        assert!(ids.contains(&"spearman"));
        assert!(ids.contains(&"shapiro_wilk"));
    }

    // ==================== Visualisation ====================

    #[tokio::test]
    async fn test_visualisation_endpoints() {
        let mut app = TestApp::new().await;
        app.upload("data.csv", "text/csv", paired_csv().as_bytes()).await;

        let (status, body) = app.get("/visualisation/summary").await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["rows"], 20);

        let (status, _) = app.get("/visualisation/histogram?column=a&bins=5").await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app.get("/visualisation/boxplot?column=a&group=group").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.get("/visualisation/line").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Parameter 'x' is required");
    }

    // ==================== Authentication ====================

    #[tokio::test]
    async fn test_register_login_profile_logout() {
        let mut app = TestApp::new().await;
        let (status, body) = app
            .post(
                "/auth/register",
                json!({
                    "username": "alice",
                    "email": "alice@example.com",
                    "password": "password123",
                    "confirm_password": "password123",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["user"]["role"], "user");
        assert!(body["user"].get("password_hash").is_none());

        let (status, _) = app.get("/auth/profile").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        assert_eq!(app.login("alice", "password123").await, StatusCode::OK);
        let (status, body) = app.get("/auth/profile").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["username"], "alice");

        let (status, _) = app.post("/auth/logout", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.get("/auth/profile").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_validation_errors_are_listed() {
        let mut app = TestApp::new().await;
        let (status, body) = app
            .post(
                "/auth/register",
                json!({ "username": "al", "email": "nope", "password": "short", "confirm_password": "short" }),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_registration_can_be_disabled() {
        let mut app = TestApp::with_config(|c| c.auth.disable_public_registration = true).await;
        let (status, _) = app
            .post(
                "/auth/register",
                json!({
                    "username": "alice",
                    "email": "alice@example.com",
                    "password": "password123",
                    "confirm_password": "password123",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_account_locks_after_failed_logins() {
        let mut app = TestApp::with_config(|c| c.auth.max_login_attempts = 3).await;

        for _ in 0..3 {
            assert_eq!(app.login("admin", "wrong-password").await, StatusCode::UNAUTHORIZED);
        }
        assert_eq!(app.login("admin", "admin123").await, StatusCode::LOCKED);
    }

    #[tokio::test]
    async fn test_admin_routes_need_manage_users() {
        let mut app = TestApp::new().await;
        let (status, _) = app.get("/auth/users").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let hash = hash_password("password123", 1000);
        app.state
            .users
            .create("bob", "bob@example.com", &hash, Role::User)
            .unwrap();
        assert_eq!(app.login("bob", "password123").await, StatusCode::OK);
        let (status, body) = app.get("/auth/users").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "Insufficient permissions");

        assert_eq!(app.login("admin", "admin123").await, StatusCode::OK);
        let (status, body) = app.get("/auth/users").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_require_login_guards_features() {
        let mut app = TestApp::with_config(|c| c.auth.require_login = true).await;

        let (status, body) = app.get("/tests/available").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Authentication required");

        let (status, _) = app.get("/health").await;
        assert_eq!(status, StatusCode::OK);

        let hash = hash_password("password123", 1000);
        app.state
            .users
            .create("viewer", "viewer@example.com", &hash, Role::Viewer)
            .unwrap();
        assert_eq!(app.login("viewer", "password123").await, StatusCode::OK);

        let (status, _) = app.get("/tests/available").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app
            .post("/tests/run", json!({ "test": "spearman", "columns": ["a", "b"] }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    // ==================== Cartographie ====================

    #[tokio::test]
    async fn test_location_roundtrip_invalidates_cache() {
        let mut app = TestApp::new().await;

        let (status, body) = app.get("/cartographie/api/locations").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"].as_array().unwrap().len(), 0);

        let (status, body) = app
            .post(
                "/cartographie/api/locations",
                json!({ "username": "ama", "lat": "5.35", "lon": -4.01 }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["status"], "ok");

        let (_, body) = app.get("/cartographie/api/locations").await;
        let users = body["users"].as_array().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["username"], "ama");
    }

    #[tokio::test]
    async fn test_location_validation() {
        let mut app = TestApp::new().await;

        let (status, body) = app
            .post("/cartographie/api/locations", json!({ "username": "ama" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Latitude and longitude are required");

        let (status, body) = app
            .post("/cartographie/api/locations", json!({ "lat": "north", "lon": 2.0 }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid latitude/longitude");

        let (status, _) = app
            .post("/cartographie/api/locations", json!({ "latitude": 91.0, "longitude": 2.0 }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .post(
                "/cartographie/api/locations",
                json!({ "lat": 1.0, "lon": 2.0, "active_users": "many" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // ==================== Forecasts & Jobs ====================

    async fn app_with_model() -> TestApp {
        let mut app = TestApp::new().await;
        let csv = price_csv(80);
        let frame = boursa::dataset::load_bytes("prices.csv", csv.as_bytes()).unwrap().frame;
        let artifact = train(&frame, "Close", ModelKind::Ridge).unwrap();
        artifact.save(&app.state.models_dir.join("ridge.json")).unwrap();

        let (status, body) = app.upload("prices.csv", "text/csv", csv.as_bytes()).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        app
    }

    #[tokio::test]
    async fn test_models_are_listed() {
        let mut app = app_with_model().await;
        let (status, body) = app.get("/previsions/models").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.to_string().contains("ridge.json"));
    }

    #[tokio::test]
    async fn test_forecast_run_and_download() {
        let mut app = app_with_model().await;
        let (status, body) = app
            .post(
                "/previsions/run",
                json!({ "steps": 5, "target": "Close", "model": "ridge.json" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["forecast"]["forecast_data"].as_array().unwrap().len(), 5);

        let (_, body) = app.get("/previsions/last").await;
        assert!(body["forecast"].is_object());

        let req = Request::builder()
            .uri("/previsions/download_forecast")
            .body(Body::empty())
            .unwrap();
        let response = app.send(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(CONTENT_DISPOSITION).is_some());

        let (_, body) = app.get("/previsions/history").await;
        assert_eq!(body["history"]["total"], 1);
    }

    #[tokio::test]
    async fn test_forecast_rejects_bad_parameters() {
        let mut app = app_with_model().await;

        let (status, _) = app
            .post("/previsions/run", json!({ "steps": 0, "target": "Close", "model": "ridge.json" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .post("/previsions/run", json!({ "steps": 5, "target": "Close", "model": "absent.json" }))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_forecast_job_completes() {
        let mut app = app_with_model().await;
        let (status, body) = app
            .post(
                "/previsions/jobs",
                json!({ "steps": 3, "target": "Close", "model": "ridge.json" }),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let mut result = None;
        for _ in 0..100 {
            let (status, body) = app.get(&format!("/jobs/result/{}", job_id)).await;
            if status == StatusCode::OK {
                result = Some(body);
                break;
            }
            assert_eq!(status, StatusCode::ACCEPTED);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let result = result.expect("job did not finish");
        assert_eq!(result["status"], "done");
        assert_eq!(result["result"]["forecast_data"].as_array().unwrap().len(), 3);

        let (status, body) = app.get(&format!("/jobs/status/{}", job_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "done");
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let mut app = TestApp::new().await;

        let (status, body) = app.get("/jobs/status/00000000000000000000000000000000").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "not_found");

        let (status, body) = app.get("/jobs/result/../../etc").await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", body);
    }

    // ==================== Stock Quote Import ====================

    struct FakeYahoo;

    #[async_trait]
    impl QuoteProvider for FakeYahoo {
        fn provider(&self) -> Provider {
            Provider::Yahoo
        }

        async fn fetch(&self, _request: &FetchRequest) -> Result<DataFrame, StockApiError> {
            let headers = ["Date", "Open", "High", "Low", "Close", "Volume"]
                .iter()
                .map(|h| h.to_string())
                .collect();
            let rows = (1..=3)
                .map(|d| {
                    vec![
                        Some(format!("2024-03-0{}", d)),
                        Some("10.0".into()),
                        Some("12.0".into()),
                        Some("9.5".into()),
                        Some(format!("{}.0", 10 + d)),
                        Some("1000".into()),
                    ]
                })
                .collect();
            Ok(DataFrame::from_rows(headers, rows))
        }
    }

    fn app_with_fake_quotes(fetch_limit: usize) -> TestApp {
        let root = temp_root();
        let mut config = testing_config(&root);
        config.stock_api.fetch_limit = fetch_limit;
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(1000));
        let stock = StockApiService::with_providers(
            &config.stock_api,
            cache.clone(),
            vec![Arc::new(FakeYahoo)],
        );
        let state = AppState::with_stock(config, cache, stock).unwrap();
        TestApp::from_state(state, root)
    }

    #[tokio::test]
    async fn test_api_fetch_loads_quotes() {
        let mut app = app_with_fake_quotes(10);
        let (status, body) = app
            .post(
                "/upload/api_fetch",
                json!({ "source": "yahoo", "symbol": "aapl", "interval": "1d" }),
            )
            .await;

        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["filename"], "yahoo_AAPL_1d.csv");
        assert_eq!(body["rows"], 3);
        assert!(app.root.join("uploads/yahoo_AAPL_1d.csv").exists());
    }

    #[tokio::test]
    async fn test_api_fetch_validation_and_session_limit() {
        let mut app = app_with_fake_quotes(3);

        let (status, body) = app
            .post("/upload/api_fetch", json!({ "source": "bloomberg", "symbol": "AAPL" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().starts_with("Unsupported data source"));

        let (status, body) = app
            .post("/upload/api_fetch", json!({ "source": "yahoo", "symbol": "  " }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Symbol is required");

        let (status, _) = app
            .post("/upload/api_fetch", json!({ "source": "yahoo", "symbol": "MSFT" }))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app
            .post("/upload/api_fetch", json!({ "source": "yahoo", "symbol": "MSFT" }))
            .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }
}
