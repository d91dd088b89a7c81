use actix_cors::Cors;
use actix_files::Files;
use actix_multipart::{Multipart, MultipartError};
use actix_web::http::header;
use actix_web::{HttpResponse, web};
use chrono::Utc;
use futures_util::TryStreamExt;
use log::{error, info, warn};
use std::path::{Path, PathBuf};

use crate::analysis::{AnalysisReply, AnalysisRequest, AnalysisService};
use crate::auth::middleware::CallerIdentity;
use crate::logstore::store::VisionLogStore;
use crate::vision::PipelineError;

const IMAGE_FIELD: &str = "image";
const DEFAULT_EXTENSION: &str = ".jpg";

/// Directory uploaded images are written to before analysis.
#[derive(Debug, Clone)]
pub struct UploadDir(pub PathBuf);

#[derive(Debug, thiserror::Error)]
enum UploadError {
    #[error("Multipart error: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

/// Must be the outermost middleware so preflight requests are answered
/// before authentication runs.
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::ACCEPT,
            header::CONTENT_TYPE,
        ])
        .max_age(3600)
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, upload_dir: PathBuf) {
    cfg.service(
        web::scope("/api/analysis")
            .route("/fruit-vision", web::post().to(analyze_fruit_vision))
            .route("/log-health", web::get().to(log_health)),
    )
    .service(Files::new("/uploads", upload_dir));
}

async fn analyze_fruit_vision(
    service: web::Data<AnalysisService>,
    upload_dir: web::Data<UploadDir>,
    caller: CallerIdentity,
    payload: Multipart,
) -> HttpResponse {
    let image_path = match store_upload(&upload_dir.0, payload).await {
        Ok(path) => path,
        Err(UploadError::Multipart(e)) if is_not_a_form(&e) => {
            warn!("Request is not a multipart upload: {}", e);
            None
        }
        Err(e) => {
            error!("Failed to receive uploaded image: {}", e);
            return to_response(AnalysisReply::from_error(&PipelineError::Internal(
                e.to_string(),
            )));
        }
    };

    let reply = service
        .analyze(AnalysisRequest {
            image_path,
            caller_identity: caller.0,
        })
        .await;
    to_response(reply)
}

async fn log_health(store: web::Data<VisionLogStore>) -> HttpResponse {
    HttpResponse::Ok().json(store.health())
}

/// The body was never a form, so no file was supplied.
fn is_not_a_form(error: &MultipartError) -> bool {
    matches!(
        error,
        MultipartError::ContentTypeMissing
            | MultipartError::ContentTypeParse
            | MultipartError::ContentTypeIncompatible
            | MultipartError::BoundaryMissing
    )
}

fn to_response(reply: AnalysisReply) -> HttpResponse {
    match reply {
        AnalysisReply::Success(body) => HttpResponse::Ok().json(body),
        AnalysisReply::Failure { status, body } => HttpResponse::build(status).json(body),
    }
}

/// Writes the first non-empty `image` field to `dir`. Other fields are
/// drained and ignored.
async fn store_upload(dir: &Path, mut payload: Multipart) -> Result<Option<PathBuf>, UploadError> {
    let mut stored = None;

    while let Some(mut field) = payload.try_next().await? {
        let wanted = stored.is_none() && field.name() == Some(IMAGE_FIELD);
        let extension = field
            .content_disposition()
            .and_then(|disposition| disposition.get_filename())
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

        let mut image_data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if wanted {
                image_data.extend_from_slice(&chunk);
            }
        }

        if !wanted || image_data.is_empty() {
            continue;
        }

        let path = dir.join(upload_file_name(&extension));
        tokio::fs::write(&path, &image_data).await?;
        info!(
            "Stored upload ({} bytes) at {}",
            image_data.len(),
            path.display()
        );
        stored = Some(path);
    }

    Ok(stored)
}

fn upload_file_name(extension: &str) -> String {
    format!(
        "fruit-{}-{}{}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>() % 1_000_000_000,
        extension
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::JwtService;
    use crate::auth::jwt::testing::token_for_user;
    use crate::auth::middleware::AuthMiddleware;
    use crate::logstore::testing::RecordingBackend;
    use crate::vision::classifier::Classifier;
    use crate::vision::{AnalysisResult, PipelineError};
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use async_trait::async_trait;
    use shared::AnalysisData;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    const BOUNDARY: &str = "----gotanny-boundary";
    const SECRET: &str = "routes-secret";

    /// Reads the uploaded file back so tests can see what reached the classifier.
    #[derive(Default)]
    struct EchoClassifier {
        seen: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    }

    #[async_trait]
    impl Classifier for EchoClassifier {
        async fn classify(&self, image_path: &Path) -> Result<AnalysisResult, PipelineError> {
            let bytes = std::fs::read(image_path).map_err(|e| PipelineError::Internal(e.to_string()))?;
            self.seen
                .lock()
                .unwrap()
                .push((image_path.to_path_buf(), bytes));
            Ok(AnalysisResult::Success(AnalysisData {
                fruit: "apple".into(),
                disease: "scab".into(),
                confidence: 0.91,
                reasons: vec!["lesion pattern".into()],
            }))
        }
    }

    fn multipart_body(fields: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, content) in fields {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(body: Vec<u8>) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/analysis/fruit-vision")
            .insert_header((
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    struct Fixture {
        dir: TempDir,
        classifier: Arc<EchoClassifier>,
        backend: Arc<RecordingBackend>,
        store: Arc<VisionLogStore>,
        service: web::Data<AnalysisService>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let classifier = Arc::new(EchoClassifier::default());
        let backend = Arc::new(RecordingBackend::default());
        let store = Arc::new(VisionLogStore::new(
            None,
            Some(backend.clone()),
            Duration::from_secs(1),
        ));
        let service = web::Data::new(AnalysisService::new(
            classifier.clone(),
            store.clone(),
            Duration::from_secs(5),
        ));
        Fixture {
            dir,
            classifier,
            backend,
            store,
            service,
        }
    }

    macro_rules! app {
        ($fixture:expr) => {
            test::init_service(
                App::new()
                    .wrap(AuthMiddleware::new(Some(JwtService::new(SECRET)), false))
                    .app_data($fixture.service.clone())
                    .app_data(web::Data::from($fixture.store.clone()))
                    .app_data(web::Data::new(UploadDir($fixture.dir.path().to_path_buf())))
                    .configure(|cfg| configure_routes(cfg, $fixture.dir.path().to_path_buf())),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn upload_is_stored_and_analysed() {
        let fixture = fixture();
        let app = app!(fixture);

        let body = multipart_body(&[
            ("note", None, &b"from the field"[..]),
            ("image", Some("leaf.png"), &b"\x89PNG fake image"[..]),
        ]);
        let resp = test::call_service(&app, upload_request(body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["fruit"], "apple");

        let seen = fixture.classifier.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        let (path, bytes) = &seen[0];
        assert_eq!(bytes.as_slice(), &b"\x89PNG fake image"[..]);
        assert!(path.starts_with(fixture.dir.path()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("fruit-"));
        assert!(name.ends_with(".png"));

        let records = fixture.backend.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].user_id.is_none());
    }

    #[actix_web::test]
    async fn missing_image_field_is_a_bad_request() {
        let fixture = fixture();
        let app = app!(fixture);

        let body = multipart_body(&[("photo", Some("leaf.jpg"), &b"bytes"[..])]);
        let resp = test::call_service(&app, upload_request(body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], crate::analysis::MISSING_FILE);
        assert!(fixture.classifier.seen.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn non_multipart_request_is_a_bad_request() {
        let fixture = fixture();
        let app = app!(fixture);

        let req = test::TestRequest::post()
            .uri("/api/analysis/fruit-vision")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(json["message"], crate::analysis::MISSING_FILE);

        let req = test::TestRequest::post()
            .uri("/api/analysis/fruit-vision")
            .insert_header(("Content-Type", "application/json"))
            .set_payload(r#"{"image":"leaf.jpg"}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/analysis/fruit-vision")
            .insert_header(("Content-Type", "multipart/form-data"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert!(fixture.classifier.seen.lock().unwrap().is_empty());
        assert!(fixture.backend.records().is_empty());
    }

    #[actix_web::test]
    async fn authenticated_upload_records_caller() {
        let fixture = fixture();
        let app = app!(fixture);
        let token = token_for_user(SECRET, "665f1c2a9b");

        let body = multipart_body(&[("image", Some("leaf"), &b"jpeg bytes"[..])]);
        let req = upload_request(body)
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let records = fixture.backend.records();
        assert_eq!(records[0].user_id.as_deref(), Some("665f1c2a9b"));
        assert!(records[0].image_path.ends_with(".jpg"));
    }

    #[actix_web::test]
    async fn preflight_passes_required_auth() {
        let fixture = fixture();
        let app = test::init_service(
            App::new()
                .wrap(AuthMiddleware::new(Some(JwtService::new(SECRET)), true))
                .wrap(cors())
                .app_data(fixture.service.clone())
                .app_data(web::Data::from(fixture.store.clone()))
                .app_data(web::Data::new(UploadDir(fixture.dir.path().to_path_buf())))
                .configure(|cfg| configure_routes(cfg, fixture.dir.path().to_path_buf())),
        )
        .await;

        let req = test::TestRequest::default()
            .method(actix_web::http::Method::OPTIONS)
            .uri("/api/analysis/fruit-vision")
            .insert_header(("Origin", "http://localhost:5173"))
            .insert_header(("Access-Control-Request-Method", "POST"))
            .insert_header(("Access-Control-Request-Headers", "authorization"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            resp.headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );

        let body = multipart_body(&[("image", Some("leaf.jpg"), &b"jpeg bytes"[..])]);
        let req = upload_request(body)
            .insert_header(("Origin", "http://localhost:5173"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(fixture.classifier.seen.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn log_health_reports_counters() {
        let fixture = fixture();
        let app = app!(fixture);

        let body = multipart_body(&[("image", Some("leaf.jpg"), &b"jpeg bytes"[..])]);
        test::call_service(&app, upload_request(body).to_request()).await;

        let req = test::TestRequest::get()
            .uri("/api/analysis/log-health")
            .to_request();
        let json: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(json["primaryEnabled"], false);
        assert_eq!(json["secondaryEnabled"], true);
        assert_eq!(json["secondaryWrites"], 1);
        assert_eq!(json["failedWrites"], 0);
    }

    #[actix_web::test]
    async fn upload_names_keep_extension() {
        let name = upload_file_name(".webp");
        assert!(name.starts_with("fruit-"));
        assert!(name.ends_with(".webp"));
    }
}
