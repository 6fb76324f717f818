//! One worker's observable stream.
//!
//! The worker writes raw [SdrObservable] records back-to-back with no
//! framing, so the session appends whatever arrives to its buffer and
//! extracts whole records; a short read simply leaves the partial record
//! buffered for the next pass. Base batches refresh the registry's
//! snapshot, rover batches drive the fuser.

use std::sync::Arc;

use bytes::BytesMut;
use log::{debug, info, trace, warn};
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tokio::sync::watch;

use crate::errors::Error;
use crate::observables::SdrObservable;
use crate::position::Fuser;
use crate::registry::Registry;
use crate::station::{Station, StationType};
use crate::supervisor::wait_shutdown;

const BUFFER_RECORDS: usize = 32;

pub struct Session {
    stream: UnixStream,
    station: Station,
    registry: Arc<Registry>,
    /// Present for rovers only; the base feeds the registry instead.
    fuser: Option<Fuser>,
    buffer: BytesMut,
}

impl Session {
    pub fn new(
        stream: UnixStream,
        station: Station,
        registry: Arc<Registry>,
        fuser: Option<Fuser>,
    ) -> Self {
        Self {
            stream,
            station,
            registry,
            fuser,
            buffer: BytesMut::with_capacity(BUFFER_RECORDS * SdrObservable::SIZE),
        }
    }

    /// Reads until EOF, a transport error, or shutdown; then removes the
    /// station from the registry. Removal is idempotent: the station task
    /// may already have pulled it on a failure elsewhere.
    pub async fn run(&mut self, shutdown: &mut watch::Receiver<bool>) {
        loop {
            tokio::select! {
                read = self.stream.read_buf(&mut self.buffer) => match read {
                    Ok(0) => {
                        debug!("{}: worker closed the stream", self.station.address);
                        break;
                    },
                    Ok(_) => {
                        let batch = drain_records(&mut self.buffer);
                        if !batch.is_empty() {
                            self.dispatch(batch);
                        }
                    },
                    Err(e) => {
                        warn!("{}: session read failed: {}", self.station.address, e);
                        break;
                    },
                },
                _ = wait_shutdown(shutdown) => break,
            }
        }

        info!("removing station {}", self.station);
        match self.registry.remove(&self.station) {
            Ok(()) => {},
            Err(Error::StationNotFound) => {},
            Err(e) => warn!("{}: removal failed: {}", self.station.address, e),
        }
    }

    fn dispatch(&mut self, batch: Vec<SdrObservable>) {
        trace!(
            "received {} observables from gnss-sdr@{}",
            batch.len(),
            self.station.address,
        );

        if self.station.kind == StationType::Base {
            self.registry.set_base_observables(batch);
            return;
        }

        if let Some(fuser) = &mut self.fuser {
            match fuser.position(&batch) {
                Ok(()) => {},
                Err(Error::NoBaseStation) => {
                    debug!("{}: no base station yet, batch dropped", self.station.address);
                },
                Err(Error::RtkFailure) => {
                    debug!("{}: RTK positioning failed", self.station.address);
                },
                Err(e) => {
                    warn!("{}: positioning error: {}", self.station.address, e);
                },
            }
        }
    }
}

/// Extracts every whole record currently buffered. Leftover bytes stay put:
/// after N total bytes, callers have seen `N / SIZE` records and the buffer
/// holds `N % SIZE` bytes.
fn drain_records(buffer: &mut BytesMut) -> Vec<SdrObservable> {
    let mut batch = Vec::with_capacity(buffer.len() / SdrObservable::SIZE);
    while buffer.len() >= SdrObservable::SIZE {
        let record = buffer.split_to(SdrObservable::SIZE);
        batch.push(SdrObservable::decode(&record));
    }
    batch
}

#[cfg(test)]
mod test {
    use super::{drain_records, Session};
    use std::sync::Arc;

    use bytes::{BufMut, BytesMut};
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;
    use tokio::sync::watch;

    use crate::observables::SdrObservable;
    use crate::registry::Registry;
    use crate::station::{Station, StationType};

    fn record(prn: u32) -> SdrObservable {
        SdrObservable {
            system: b'G',
            signal: *b"1C\0",
            prn,
            tow: 345_600.0,
            valid_pseudorange: true,
            ..Default::default()
        }
    }

    #[test]
    fn partial_records_stay_buffered() {
        let size = SdrObservable::SIZE;

        let mut stream = Vec::new();
        stream.extend_from_slice(&record(1).encode());
        stream.extend_from_slice(&record(2).encode());
        stream.extend_from_slice(&record(3).encode()[..5]);

        // three chunks: 10, size - 5, size + 10
        let chunks = [&stream[..10], &stream[10..size + 5], &stream[size + 5..]];
        assert_eq!(chunks[2].len(), size);

        let mut buffer = BytesMut::new();
        let mut dispatched = Vec::new();

        buffer.put_slice(chunks[0]);
        dispatched.extend(drain_records(&mut buffer));
        assert_eq!(dispatched.len(), 0);
        assert_eq!(buffer.len(), 10);

        buffer.put_slice(chunks[1]);
        dispatched.extend(drain_records(&mut buffer));
        assert_eq!(dispatched.len(), 1);
        assert_eq!(buffer.len(), 5);

        buffer.put_slice(chunks[2]);
        dispatched.extend(drain_records(&mut buffer));
        assert_eq!(dispatched.len(), 2);
        assert_eq!(buffer.len(), 5);

        assert_eq!(dispatched[0].prn, 1);
        assert_eq!(dispatched[1].prn, 2);
    }

    #[test]
    fn framing_arithmetic_over_any_total() {
        let size = SdrObservable::SIZE;
        let mut buffer = BytesMut::new();

        let payload = record(9).encode();
        let total = size * 3 + 17;
        let mut fed = 0;
        let mut records = 0;

        while fed < total {
            let n = (total - fed).min(50);
            let mut chunk = Vec::new();
            while chunk.len() < n {
                let offset = (fed + chunk.len()) % size;
                chunk.push(payload[offset]);
            }
            buffer.put_slice(&chunk);
            fed += n;
            records += drain_records(&mut buffer).len();
        }

        assert_eq!(records, total / size);
        assert_eq!(buffer.len(), total % size);
    }

    #[tokio::test]
    async fn base_session_feeds_the_registry_and_removes_itself() {
        let registry = Arc::new(Registry::new());
        let station = Station::new(StationType::Base, "10.0.2.1", 1234);
        registry.add(&station).unwrap();

        let (mut writer, reader) = UnixStream::pair().unwrap();
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let mut session = Session::new(reader, station.clone(), registry.clone(), None);

        let mut payload = Vec::new();
        payload.extend_from_slice(&record(4).encode());
        payload.extend_from_slice(&record(6).encode());
        writer.write_all(&payload).await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        session.run(&mut shutdown_rx).await;

        // stream ended: the latest batch is cached, station gone
        let observables = registry.base_observables();
        assert!(!observables.is_empty());
        assert_eq!(observables.last().unwrap().prn, 6);
        assert!(!registry.has_base());
    }

    #[tokio::test]
    async fn shutdown_stops_the_session() {
        let registry = Arc::new(Registry::new());
        let station = Station::new(StationType::Rover, "10.0.2.2", 1234);
        registry.add(&station).unwrap();

        let (_writer, reader) = UnixStream::pair().unwrap();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let mut session = Session::new(reader, station, registry.clone(), None);
        shutdown_tx.send(true).unwrap();
        session.run(&mut shutdown_rx).await;

        assert!(registry.is_empty());
    }
}
