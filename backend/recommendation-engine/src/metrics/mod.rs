//! Prometheus collectors for the engine and the `/metrics` endpoint.

use actix_web::HttpResponse;
use prometheus::{Encoder, TextEncoder};

pub mod engine;

pub use engine::*;

/// Render every registered collector in the Prometheus text format.
pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    encoder.encode(&prometheus::gather(), &mut body)?;
    Ok((encoder.format_type().to_string(), body))
}

/// GET /metrics
pub async fn serve_metrics() -> HttpResponse {
    match render() {
        Ok((content_type, body)) => HttpResponse::Ok().content_type(content_type).body(body),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_engine_collectors() {
        AUTO_BLOCKS_TOTAL.inc_by(0);
        let (content_type, body) = render().unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(String::from_utf8(body)
            .unwrap()
            .contains("engine_auto_blocks_total"));
    }
}
