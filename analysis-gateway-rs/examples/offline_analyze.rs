//! Offline Analysis Demo
//!
//! Runs the gateway against the built-in demo backend: no API key or
//! network access needed. Shows a fresh analysis, a cache hit, and
//! coalescing of concurrent identical requests.

use std::sync::Arc;

use analysis_gateway::{
    AnalysisGateway, DemoBackend, GatewayConfig, RawAnalyzeRequest, RawFollowUpRequest, Result,
};
use tracing_subscriber::EnvFilter;

const SAMPLE_LOGS: &str = "\
2024-05-01T10:00:01Z INFO  checkout-api request served in 120ms
2024-05-01T10:00:05Z WARN  checkout-api pool usage at 95%
2024-05-01T10:00:07Z ERROR checkout-api connection refused: postgres:5432
2024-05-01T10:00:09Z ERROR checkout-api timeout waiting for connection from pool
";

fn sample_request() -> RawAnalyzeRequest {
    RawAnalyzeRequest {
        log_text: Some(SAMPLE_LOGS.to_string()),
        ..RawAnalyzeRequest::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Offline Analysis Demo");
    println!("=====================\n");

    let gateway = Arc::new(AnalysisGateway::new(
        GatewayConfig::default(),
        Arc::new(DemoBackend::new()),
    ));

    let first = gateway.analyze("demo-client", sample_request()).await?;
    println!("Title:      {}", first.report.title);
    println!("Severity:   {}", first.report.severity.as_str());
    println!("Confidence: {}", first.report.confidence);
    println!("Source:     {}", first.source.as_str());
    println!("Cache key:  {}\n", first.cache_key.short());

    let second = gateway.analyze("demo-client", sample_request()).await?;
    println!("Repeat request source: {}\n", second.source.as_str());

    // Different content, issued concurrently: one backend call, the rest join it
    let mut handles = Vec::new();
    for i in 0..4 {
        let gateway = Arc::clone(&gateway);
        handles.push(tokio::spawn(async move {
            let raw = RawAnalyzeRequest {
                log_text: Some("ERROR disk full on /var/lib/kafka".to_string()),
                ..RawAnalyzeRequest::default()
            };
            gateway.analyze(&format!("client-{}", i), raw).await
        }));
    }
    for handle in handles {
        match handle.await {
            Ok(Ok(outcome)) => println!("Concurrent request source: {}", outcome.source.as_str()),
            Ok(Err(e)) => println!("Concurrent request failed: {}", e),
            Err(e) => println!("Task failed: {}", e),
        }
    }

    let answer = gateway
        .follow_up(
            "demo-client",
            RawFollowUpRequest {
                report: serde_json::to_value(first.report.as_ref())
                    .unwrap_or(serde_json::Value::Null),
                history: Vec::new(),
                question: Some("What should we check first?".to_string()),
            },
        )
        .await?;
    println!("\nFollow-up answer:\n{}", answer);

    println!("\nGateway stats: {:?}", gateway.stats());
    Ok(())
}
