use actix_multipart::Multipart;
use actix_web::{
    get,
    http::header::{self, ContentDisposition, DispositionParam, DispositionType},
    post, web, HttpMessage, HttpRequest, HttpResponse, Responder,
};
use common::validation::{validate_request, SubmittedFileValidationRequest};
use log::{info, warn};

use crate::{
    error::AppError,
    params::{SessionPackageType, SubmitParams, SubmitQuery},
    payloads::*,
    relay::progress_events,
    state::AppState,
    submission::WaitOptions,
    upload::{read_upload, validate_upload, ReadOutcome},
};

pub const SCOPE: &str = "/xbrl_validate";

#[get("/healthcheck")]
async fn healthcheck() -> impl Responder {
    ErrorablePayload::Ok("ok").to_response(HttpResponse::Ok())
}

#[post("/submit")]
async fn submit(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<SubmitQuery>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let session = req.extensions().get::<SessionPackageType>().cloned();
    let params = SubmitParams::from_query(&query, session.as_ref())?;

    let settings = &state.settings;
    let outcome = read_upload(payload, &settings.file_field_name, settings.max_file_size)
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let form = validate_upload(&outcome, &settings.file_field_name, settings.max_file_size);
    let file = match outcome {
        ReadOutcome::File(file) if !form.has_errors() => file,
        _ => {
            warn!("Rejected upload: {form:?}");
            return Err(AppError::Form(form));
        }
    };

    let outcome = if settings.wait_for_result {
        let wait = WaitOptions {
            poll_interval: settings.ui_update_interval,
            timeout: settings.ui_update_timeout,
            err_on_timeout: true,
        };
        state.submitter.submit_and_wait(file, &params, wait).await?
    } else {
        state.submitter.submit(file, &params).await?
    };
    Ok(HttpResponse::Ok().json(UploadResponse {
        file_id: outcome.file_id().to_string(),
        result: Some(outcome),
    }))
}

#[post("/submit/validate")]
async fn validate(
    state: web::Data<AppState>,
    body: web::Json<SubmittedFileValidationRequest>,
) -> Result<HttpResponse, AppError> {
    let settings = &state.settings;
    let form = validate_request(&body, &settings.file_field_name, settings.max_file_size);
    if form.has_errors() {
        return Err(AppError::Form(form));
    }
    Ok(ErrorablePayload::Ok(()).to_response(HttpResponse::Ok()))
}

#[get("/progress/{id}")]
async fn progress(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let current = state.submitter.check(&path).await?;
    Ok(HttpResponse::Ok().json(ProgressResponse {
        progress: current.percent(),
    }))
}

#[get("/result/{id}")]
async fn validation_result(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let current = state.submitter.check(&path).await?;
    Ok(HttpResponse::Ok().json(current))
}

#[get("/result/{id}/sse")]
async fn result_events(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let file_id = path.into_inner();
    let conn = uuidv7::create();
    info!("[{conn}] Streaming progress for file [{file_id}]");
    let released_id = file_id.clone();
    let events = progress_events(
        state.submitter.clone(),
        file_id,
        state.settings.relay_timings(),
        move |reason| info!("[{conn}] Released relay for file [{released_id}]: {reason}"),
    );
    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONNECTION, "keep-alive"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(events)
}

#[get("/render/{id}")]
async fn render(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let file = state.renderer.render(&path).await.map_err(AppError::Render)?;
    Ok(HttpResponse::Ok()
        .content_type(file.mime_type)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Inline,
            parameters: vec![DispositionParam::Filename(file.file_name)],
        })
        .body(file.body))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope(SCOPE)
            .service(healthcheck)
            .service(submit)
            .service(validate)
            .service(progress)
            .service(result_events)
            .service(validation_result)
            .service(render),
    );
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use actix_web::{dev::Service as _, http::StatusCode, test, App, HttpServer};
    use async_trait::async_trait;
    use bytes::Bytes;
    use common::validation::messages;
    use serde_json::json;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };

    use super::*;
    use crate::{
        backends::{BackendError, RenderApi, RenderedFile, PDF_MIME_TYPE},
        config::Settings,
        params::PackageType,
        retry::RetryPolicy,
        submission::{
            tests::{envelope, FakeStorage, FakeValidator},
            Submitter,
        },
    };

    struct FakeRenderer;

    #[async_trait]
    impl RenderApi for FakeRenderer {
        async fn render(&self, file_id: &str) -> Result<RenderedFile, BackendError> {
            if file_id != "file-1" {
                return Err(BackendError::Status {
                    url: "/render".to_string(),
                    status: 404,
                });
            }
            Ok(RenderedFile {
                file_name: "file-1.pdf".to_string(),
                mime_type: PDF_MIME_TYPE.to_string(),
                body: Bytes::from_static(b"%PDF-1.7"),
            })
        }
    }

    struct Harness {
        storage: Arc<FakeStorage>,
        validator: Arc<FakeValidator>,
        state: web::Data<AppState>,
    }

    fn settings() -> Settings {
        Settings {
            max_file_size: 1024 * 1024,
            file_field_name: "file".to_string(),
            ui_update_interval: Duration::from_millis(5),
            ui_update_timeout: Duration::from_secs(5),
            sse_heartbeat_interval: Duration::from_secs(1),
            wait_for_result: false,
        }
    }

    fn harness(validator: FakeValidator) -> Harness {
        harness_with(validator, settings())
    }

    fn harness_with(validator: FakeValidator, settings: Settings) -> Harness {
        let storage = Arc::new(FakeStorage::default());
        let validator = Arc::new(validator);
        let submitter = Submitter::new(
            storage.clone(),
            validator.clone(),
            RetryPolicy::once(),
            "/xbrl_validate/render",
        );
        let state = web::Data::new(AppState {
            submitter: Arc::new(submitter),
            renderer: Arc::new(FakeRenderer),
            settings,
        });
        Harness {
            storage,
            validator,
            state,
        }
    }

    const BOUNDARY: &str = "----accounts-boundary";

    fn multipart(field: &str, file_name: &str, content: &[u8]) -> (String, Vec<u8>) {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={BOUNDARY}"), body)
    }

    fn upload(uri: &str, field: &str, file_name: &str, content: &[u8]) -> test::TestRequest {
        let (content_type, body) = multipart(field, file_name, content);
        test::TestRequest::post()
            .uri(uri)
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
    }

    #[actix_web::test]
    async fn healthcheck_is_ok() {
        let h = harness(FakeValidator::default());
        let app = test::init_service(App::new().app_data(h.state.clone()).configure(configure)).await;
        let req = test::TestRequest::get().uri("/xbrl_validate/healthcheck").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn accepted_upload_returns_file_id() {
        let h = harness(FakeValidator::default());
        let app = test::init_service(App::new().app_data(h.state.clone()).configure(configure)).await;

        let req = upload(
            "/xbrl_validate/submit?packageType=welsh&companyNumber=sc123456",
            "file",
            "accounts.zip",
            b"PK\x03\x04rest-of-archive",
        )
        .to_request();
        let body: UploadResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body.file_id, "file-1");
        assert_eq!(body.result.map(|r| r.percent()), Some(25));
        let submitted = h.validator.submitted.lock().unwrap();
        assert_eq!(submitted[0].package_type, Some(PackageType::Welsh));
        assert_eq!(
            submitted[0].company_number.as_ref().map(|c| c.as_str()),
            Some("SC123456")
        );
        assert_eq!(*h.storage.uploads.lock().unwrap(), vec!["accounts.zip".to_string()]);
    }

    #[actix_web::test]
    async fn missing_file_is_rejected_without_backend_calls() {
        let h = harness(FakeValidator::default());
        let app = test::init_service(App::new().app_data(h.state.clone()).configure(configure)).await;

        let resp = test::call_service(&app, upload("/xbrl_validate/submit", "file", "", b"").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: FieldErrorsResponse = test::read_body_json(resp).await;
        assert_eq!(body.errors[0].field, "file");
        assert_eq!(body.errors[0].text, messages::NO_FILE);

        assert!(h.storage.uploads.lock().unwrap().is_empty());
        assert!(h.validator.submitted.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn oversized_and_wrong_type_uploads_are_rejected() {
        let h = harness(FakeValidator::default());
        let app = test::init_service(App::new().app_data(h.state.clone()).configure(configure)).await;

        let big = vec![b'x'; 1024 * 1024 + 1];
        let resp = test::call_service(&app, upload("/xbrl_validate/submit", "file", "big.zip", &big).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: FieldErrorsResponse = test::read_body_json(resp).await;
        assert_eq!(body.errors[0].text, messages::file_too_large(1));

        let resp = test::call_service(
            &app,
            upload("/xbrl_validate/submit", "file", "accounts.pdf", b"%PDF-1.4").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: FieldErrorsResponse = test::read_body_json(resp).await;
        assert_eq!(body.errors[0].text, messages::INVALID_FILE_TYPE);

        assert!(h.storage.uploads.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn invalid_parameters_are_rejected_before_upload() {
        let h = harness(FakeValidator::default());
        let app = test::init_service(App::new().app_data(h.state.clone()).configure(configure)).await;

        let req = upload(
            "/xbrl_validate/submit?packageType=not_valid",
            "file",
            "accounts.zip",
            b"PK\x03\x04",
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorablePayload<()> = test::read_body_json(resp).await;
        assert!(matches!(body, ErrorablePayload::Err(_)));
        assert!(h.storage.uploads.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn session_package_type_mismatch_is_rejected() {
        let h = harness(FakeValidator::default());
        let app = test::init_service(
            App::new()
                .app_data(h.state.clone())
                .wrap_fn(|req, srv| {
                    req.extensions_mut()
                        .insert(SessionPackageType("welsh".to_string()));
                    srv.call(req)
                })
                .configure(configure),
        )
        .await;

        let req = upload(
            "/xbrl_validate/submit?packageType=uksef",
            "file",
            "accounts.zip",
            b"PK\x03\x04",
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(h.storage.uploads.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn preflight_validation() {
        let h = harness(FakeValidator::default());
        let app = test::init_service(App::new().app_data(h.state.clone()).configure(configure)).await;

        let ok = test::TestRequest::post()
            .uri("/xbrl_validate/submit/validate")
            .set_json(json!({ "file": { "size": 10, "firstBytes": "PK\u{3}\u{4}" } }))
            .to_request();
        assert_eq!(test::call_service(&app, ok).await.status(), StatusCode::OK);

        let missing = test::TestRequest::post()
            .uri("/xbrl_validate/submit/validate")
            .set_json(json!({ "file": null }))
            .to_request();
        let resp = test::call_service(&app, missing).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: FieldErrorsResponse = test::read_body_json(resp).await;
        assert_eq!(body.errors[0].text, messages::NO_FILE);
    }

    #[actix_web::test]
    async fn progress_reports_percent_or_500() {
        let h = harness(FakeValidator::with_checks(vec![
            Ok(envelope("pending", Some("SENT_TO_VIRUS_SCANNER"))),
            Err(502),
        ]));
        let app = test::init_service(App::new().app_data(h.state.clone()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/xbrl_validate/progress/file-1").to_request();
        let body: ProgressResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.progress, 55);

        let req = test::TestRequest::get().uri("/xbrl_validate/progress/file-1").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn result_returns_mapped_state() {
        let h = harness(FakeValidator::with_checks(vec![Ok(envelope("complete", Some("OK")))]));
        let app = test::init_service(App::new().app_data(h.state.clone()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/xbrl_validate/result/file-1").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["percent"], 100);
        assert_eq!(body["imageUrl"], "/xbrl_validate/render/file-1");
    }

    #[actix_web::test]
    async fn event_stream_ends_after_completion() {
        let h = harness(FakeValidator::with_checks(vec![Ok(envelope("complete", Some("FAILED")))]));
        let app = test::init_service(App::new().app_data(h.state.clone()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/xbrl_validate/result/file-1/sse").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let headers = resp.headers();
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/event-stream");
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(headers.get("X-Accel-Buffering").unwrap(), "no");

        let body = test::read_body(resp).await;
        let text = std::str::from_utf8(&body).unwrap();
        assert_eq!(text.matches("data: ").count(), 1);
        assert!(text.contains(r#""status":"failure""#));
        assert_eq!(h.validator.calls(), 1);
    }

    #[actix_web::test]
    async fn closed_connection_is_never_checked() {
        let h = harness_with(
            FakeValidator::with_checks(vec![Ok(envelope("pending", Some("SENT_TO_TNDP")))]),
            Settings {
                ui_update_interval: Duration::from_millis(300),
                ui_update_timeout: Duration::from_secs(30),
                sse_heartbeat_interval: Duration::from_millis(50),
                ..settings()
            },
        );
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let state = h.state.clone();
        let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
            .workers(1)
            .disable_signals()
            .listen(listener)
            .unwrap()
            .run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET /xbrl_validate/result/file-1/sse HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = conn.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            head.extend_from_slice(&buf[..n]);
        }
        assert!(head.starts_with(b"HTTP/1.1 200"));
        drop(conn);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.validator.calls(), 0);
        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn render_serves_pdf_or_not_found() {
        let h = harness(FakeValidator::default());
        let app = test::init_service(App::new().app_data(h.state.clone()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/xbrl_validate/render/file-1").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), PDF_MIME_TYPE);
        assert_eq!(test::read_body(resp).await, Bytes::from_static(b"%PDF-1.7"));

        let req = test::TestRequest::get().uri("/xbrl_validate/render/other").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
