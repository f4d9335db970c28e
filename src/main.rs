/// Relay 로그 tailing 예제
///
/// 이 프로그램은 relay 디렉터리를 tailing하며 디코드된 이벤트와
/// 추적 위치를 출력합니다.
use rust_relay::{BinlogPosition, Location, LocationRecorder, RelayLogReader, RelayReaderConfig};
use std::env;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 초기화
    tracing_subscriber::fmt::init();

    // 환경 변수로 시작 위치 설정
    let relay_dir = env::var("RELAY_DIR").unwrap_or_else(|_| "./relay".to_string());
    let start_file = env::var("START_FILE").unwrap_or_else(|_| "mysql-bin.000001".to_string());
    let start_pos: u64 = env::var("START_POS")
        .unwrap_or_else(|_| "4".to_string())
        .parse()
        .unwrap_or(4);

    info!(
        "Tailing relay dir {} from {}:{}",
        relay_dir, start_file, start_pos
    );

    let mut reader = RelayLogReader::new(RelayReaderConfig::new(relay_dir));
    let mut stream = reader
        .start_sync(BinlogPosition::new(start_file.clone(), start_pos))
        .await?;

    let recorder = LocationRecorder::new();
    recorder.reset(Location::new(start_file, start_pos));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing reader");
                break;
            }
            event = stream.next() => match event {
                Ok(Some(event)) => {
                    recorder.update(&event);
                    info!(
                        "{:?} at {} ({})",
                        event.header.event_type,
                        recorder.cur_end_location(),
                        event.header.timestamp_utc()
                    );
                }
                Ok(None) => {
                    info!("Event stream ended");
                    break;
                }
                Err(err) => {
                    error!("Event stream failed: {}", err);
                    break;
                }
            }
        }
    }

    reader.close().await;
    Ok(())
}
