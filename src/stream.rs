//! 이벤트 출력 스트림
//!
//! 생산자(reader worker)와 소비자 사이의 단일 소비자 스트림입니다.
//! 비정상 종료 시 종료 에러가 스트림에 붙고, 정확히 한 번 꺼내집니다.

use crate::error::{RelayError, Result};
use crate::events::BinlogEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 생산자-소비자 사이에 한 번에 하나의 이벤트만 전달
const STREAM_CAPACITY: usize = 1;

/// 새 이벤트 스트림 쌍 생성
pub fn event_channel() -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
    let error = Arc::new(Mutex::new(None));
    (
        EventSender {
            tx,
            error: error.clone(),
        },
        EventStream { rx, error },
    )
}

/// 스트림 생산자 쪽 핸들
pub struct EventSender {
    tx: mpsc::Sender<BinlogEvent>,
    error: Arc<Mutex<Option<RelayError>>>,
}

impl EventSender {
    /// 취소 가능한 송신
    ///
    /// 소비자가 이벤트를 가져갈 때까지 블록되지만, token이 취소되면
    /// 즉시 `Canceled`로 빠져나오므로 Close가 교착되지 않습니다.
    pub async fn send(&self, event: BinlogEvent, token: &CancellationToken) -> Result<()> {
        tokio::select! {
            result = self.tx.send(event) => result.map_err(|_| RelayError::ChannelClosed),
            _ = token.cancelled() => Err(RelayError::Canceled),
        }
    }

    /// 종료 에러를 붙이고 스트림을 닫음
    pub fn close_with_error(self, err: RelayError) {
        *self.error.lock() = Some(err);
        // self가 버려지면서 채널이 닫힘
    }
}

/// 스트림 소비자 쪽 핸들
pub struct EventStream {
    rx: mpsc::Receiver<BinlogEvent>,
    error: Arc<Mutex<Option<RelayError>>>,
}

impl EventStream {
    /// 다음 이벤트 수신
    ///
    /// 스트림이 닫힌 뒤에는 붙어 있는 종료 에러를 정확히 한 번
    /// 반환하고, 그 후로는 `Ok(None)`을 돌려줍니다.
    pub async fn next(&mut self) -> Result<Option<BinlogEvent>> {
        match self.rx.recv().await {
            Some(event) => Ok(Some(event)),
            None => match self.error.lock().take() {
                Some(err) => Err(err),
                None => Ok(None),
            },
        }
    }
}
