use crate::{config::AppConfig, error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

fn config_json(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "decoder": {
            "codec": config.decoder.codec,
            "supported_sample_rates": config.decoder.supported_sample_rates,
            "max_channels": config.decoder.max_channels,
            "max_sessions": config.decoder.max_sessions,
            "default_chunk_size": config.decoder.default_chunk_size,
            "strict_source_decode": config.decoder.strict_source_decode,
            "operation_timeout_ms": config.decoder.operation_timeout_ms,
            "max_payload_bytes": config.decoder.max_payload_bytes
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_json(&config)
    })))
}

/// Partial runtime update. Decoder changes apply to the next boundary call;
/// `server` and `decoder.codec` only take effect after a restart.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_json(&current_config)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::Pcm16Codec;
    use crate::service::DecoderService;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::Value;
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_update_then_read_back() {
        let config = AppConfig::default();
        let state = web::Data::new(AppState::new(
            config.clone(),
            DecoderService::new(Arc::new(Pcm16Codec), &config),
        ));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/config", web::get().to(get_config))
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"decoder": {"default_chunk_size": 80, "strict_source_decode": true}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.decoder.policy().default_chunk_size, 80);

        let req = test::TestRequest::get().uri("/config").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["config"]["decoder"]["default_chunk_size"], 80);
        assert_eq!(body["config"]["decoder"]["strict_source_decode"], true);

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"decoder": {"max_sessions": 0}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.get_config().decoder.max_sessions, 64);
    }
}
