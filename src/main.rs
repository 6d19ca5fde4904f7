/// Binlog 릴레이 실행
///
/// 표준 입력에서 Maxwell 형식 JSON 레코드를 한 줄씩 읽어,
/// 변환된 도메인 이벤트를 표준 출력에 JSON 한 줄씩 발행합니다.
use binlog_relay::{
    JsonLinesTransport, RawChangeRecord, Relay, RelayConfig, RelayMetrics, SharedCheckpoint,
    StaticLookup,
};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로그는 stderr로 (stdout은 이벤트 출력용)
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let config = RelayConfig::from_env();
    let entity_file = env::var("RELAY_ENTITY_FILE").unwrap_or_else(|_| "entities.json".to_string());

    let lookup = StaticLookup::load(&entity_file).await?;
    info!("Loaded {} accounts from {}", lookup.len(), entity_file);
    info!("Relay config: {:?}", config);

    let transport = Arc::new(JsonLinesTransport::new(
        std::io::stdout(),
        config.max_payload_bytes,
    ));
    let checkpoint = Arc::new(SharedCheckpoint::new());
    let metrics = Arc::new(RelayMetrics::new());

    let relay = Relay::new(
        &config,
        Arc::new(lookup),
        transport,
        checkpoint.clone(),
        metrics,
    );

    let (tx, rx) = mpsc::channel(1024);

    // stdin 리더: 파싱할 수 없는 줄은 위치 정보가 없으므로 경고 후 버림
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match RawChangeRecord::from_json(&line) {
                Ok(record) => {
                    if tx.send(record).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Ignoring unparseable record {}: {}", line, e),
            }
        }
        Ok::<_, std::io::Error>(())
    });

    relay.run(rx).await;
    reader.await??;

    match checkpoint.latest() {
        Some(position) => info!("Last checkpoint: {}", position),
        None => info!("No records were checkpointed"),
    }

    Ok(())
}
