//! Слой представления: куда звонок отдаёт локальный/удалённый поток и статус.

use crate::peer::types::{CallStatus, LocalMedia, RemoteStream};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// Sinks populated by the call driver. `None` clears a sink.
pub trait CallView: Send + Sync {
    fn set_local_stream(&self, stream: Option<LocalMedia>);

    /// Called once per remote track. Tracks of the current stream accumulate; a track of another
    /// stream replaces it.
    fn set_remote_stream(&self, stream: Option<RemoteStream>);

    fn on_status(&self, status: CallStatus);
}

/// Дорожки текущего удалённого потока и их читатели
#[derive(Debug, Default)]
struct RemoteReaders {
    stream_id: Option<String>,
    readers: HashMap<String, Option<AbortHandle>>,
}

impl RemoteReaders {
    fn clear(&mut self) {
        for reader in self.readers.drain().filter_map(|(_, reader)| reader) {
            reader.abort();
        }
        self.stream_id = None;
    }
}

/// Вывод в лог вместо видео-элементов. Статус публикуется в `watch` канал.
#[derive(Debug)]
pub struct ConsoleView {
    status: watch::Sender<Option<CallStatus>>,
    remote: Mutex<RemoteReaders>,
}

impl ConsoleView {
    pub fn new() -> (Self, watch::Receiver<Option<CallStatus>>) {
        let (status, rx) = watch::channel(None);
        (
            Self {
                status,
                remote: Mutex::new(RemoteReaders::default()),
            },
            rx,
        )
    }

    /// Track ids of the attached remote stream, sorted.
    pub fn remote_tracks(&self) -> Vec<String> {
        let Ok(remote) = self.remote.lock() else {
            return Vec::new();
        };
        let mut ids: Vec<String> = remote.readers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

// считаем пакеты, чтобы было видно, что медиа идёт
fn spawn_reader(stream: &RemoteStream) -> Option<AbortHandle> {
    let track = stream.track.clone()?;
    let kind = stream.kind.clone();
    let reader = tokio::spawn(async move {
        let mut packets = 0u64;
        while let Ok((packet, _)) = track.read_rtp().await {
            packets += 1;
            if packets == 1 || packets % 500 == 0 {
                debug!(%kind, packets, bytes = packet.payload.len(), "Remote media flowing");
            }
        }
        debug!(%kind, packets, "Remote track ended");
    });
    Some(reader.abort_handle())
}

impl CallView for ConsoleView {
    fn set_local_stream(&self, stream: Option<LocalMedia>) {
        match stream {
            Some(media) => info!(
                stream_id = %media.stream_id,
                tracks = media.tracks.len(),
                "Local stream attached"
            ),
            None => debug!("Local stream cleared"),
        }
    }

    fn set_remote_stream(&self, stream: Option<RemoteStream>) {
        let Ok(mut remote) = self.remote.lock() else {
            return;
        };
        let Some(stream) = stream else {
            debug!("Remote stream cleared");
            remote.clear();
            return;
        };

        if remote.stream_id.as_deref() != Some(stream.stream_id.as_str()) {
            if let Some(previous) = remote.stream_id.as_deref() {
                info!(%previous, next = %stream.stream_id, "Remote stream replaced");
            }
            remote.clear();
            remote.stream_id = Some(stream.stream_id.clone());
        }
        info!(
            stream_id = %stream.stream_id,
            track_id = %stream.track_id,
            kind = %stream.kind,
            "Remote track attached"
        );

        let reader = spawn_reader(&stream);
        if let Some(Some(previous)) = remote.readers.insert(stream.track_id.clone(), reader) {
            previous.abort();
        }
    }

    fn on_status(&self, status: CallStatus) {
        info!(?status, "Call status");
        self.status.send_replace(Some(status));
    }
}
