//! Responder-side session server.
//!
//! One listener task accepts connections and spawns a handler task per peer.
//! Each handler owns a fresh blinding secret and shares the immutable data
//! table; commands within a connection are processed strictly in order.
//! Both the accept loop and the per-connection receive loop poll a shared
//! shutdown flag on a one-second timeout, so a stop request is observed
//! within a second.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use psi_core::{
    agg::{self, AggContext},
    psi::PsiSecret,
    table::{row_id, MemTable, Table},
    Error, Result, XCoord,
};
use psi_wire::{Request, Response};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How often blocked accepts and reads re-check the shutdown flag
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Cooperative stop signal shared between the server and its owner
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop; observed by all loops within [`POLL_INTERVAL`]
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The responder server: a bound listener plus the party's data table
pub struct Server {
    listener: TcpListener,
    table: Arc<MemTable>,
    shutdown: ShutdownFlag,
}

impl Server {
    /// Bind the listener; port 0 picks an ephemeral port
    pub async fn bind(host: &str, port: u16, table: MemTable) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        Ok(Self {
            listener,
            table: Arc::new(table),
            shutdown: ShutdownFlag::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle used to stop the server from another task
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Accept peers until the shutdown flag is set.
    ///
    /// In-flight handlers finish their current command and exit on their
    /// next poll or I/O error.
    pub async fn serve(self) -> Result<()> {
        info!(
            address = %self.local_addr()?,
            rows = self.table.len(),
            "responder listening"
        );

        loop {
            if self.shutdown.is_shutdown() {
                break;
            }
            match timeout(POLL_INTERVAL, self.listener.accept()).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
                Ok(Ok((stream, peer))) => {
                    info!(peer = %peer, "peer connected");
                    let table = self.table.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        match handle_peer(stream, table, shutdown).await {
                            Ok(()) => info!(peer = %peer, "session closed"),
                            Err(e) => warn!(peer = %peer, error = %e, "session aborted"),
                        }
                    });
                }
            }
        }

        info!("responder stopped");
        Ok(())
    }
}

/// Per-connection state: a fresh blinding secret and the shared table
struct Session {
    secret: PsiSecret,
    table: Arc<MemTable>,
}

enum Flow {
    Continue,
    Exit,
}

async fn handle_peer(
    mut stream: TcpStream,
    table: Arc<MemTable>,
    shutdown: ShutdownFlag,
) -> Result<()> {
    let session = Session {
        secret: PsiSecret::random(),
        table,
    };

    loop {
        let payload = match next_frame(&mut stream, &shutdown).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(()),
            // Framing errors get a best-effort report before the connection
            // drops; transport errors cannot be reported at all.
            Err(e) => {
                if e.kind() == psi_core::ErrorKind::Framing {
                    let _ = psi_wire::send(&mut stream, &Response::from_error(&e)).await;
                }
                return Err(e);
            }
        };

        let request: Request = match psi_wire::decode(&payload) {
            Ok(request) => request,
            Err(e) => {
                let _ = psi_wire::send(&mut stream, &Response::from_error(&e)).await;
                return Err(e);
            }
        };

        match dispatch(&session, request, &mut stream).await? {
            Flow::Continue => {}
            Flow::Exit => return Ok(()),
        }
    }
}

/// Read the next frame, re-checking the shutdown flag every second
async fn next_frame(stream: &mut TcpStream, shutdown: &ShutdownFlag) -> Result<Option<Vec<u8>>> {
    loop {
        if shutdown.is_shutdown() {
            return Ok(None);
        }
        match timeout(POLL_INTERVAL, psi_wire::read_frame(stream)).await {
            Err(_) => continue,
            Ok(result) => return result,
        }
    }
}

async fn dispatch(session: &Session, request: Request, stream: &mut TcpStream) -> Result<Flow> {
    match request {
        Request::Psi { points } => {
            debug!(points = points.len(), "PSI request");
            match handle_psi(session, &points) {
                Ok((double_blinded, own_blinded)) => {
                    // Message 2 must preserve positional correspondence;
                    // message 3 follows on the same connection.
                    psi_wire::send(stream, &Response::Points { points: double_blinded }).await?;
                    psi_wire::send(stream, &Response::Points { points: own_blinded }).await?;
                }
                Err(e) => report(stream, e).await?,
            }
            Ok(Flow::Continue)
        }
        Request::Join { ids } => {
            debug!(ids = ids.len(), "JOIN request");
            let data = handle_join(session, &ids);
            psi_wire::send(stream, &Response::Rows { data }).await?;
            Ok(Flow::Continue)
        }
        Request::SecureAggregation {
            context,
            enc_salaries,
            ids,
        } => {
            debug!(ids = ids.len(), "SECURE_AGGREGATION request");
            match handle_secure_aggregation(session, &context, &enc_salaries, &ids) {
                Ok(results) => {
                    psi_wire::send(stream, &Response::Aggregates { results }).await?;
                }
                Err(e) => report(stream, e).await?,
            }
            Ok(Flow::Continue)
        }
        Request::Exit => {
            debug!("EXIT request");
            Ok(Flow::Exit)
        }
    }
}

/// Report a command failure. Recoverable kinds leave the connection open;
/// everything else propagates and closes it.
async fn report(stream: &mut TcpStream, error: Error) -> Result<()> {
    warn!(kind = %error.kind(), error = %error, "command failed");
    psi_wire::send(stream, &Response::from_error(&error)).await?;
    if error.kind().recoverable() {
        Ok(())
    } else {
        Err(error)
    }
}

/// PSI: double-blind the received points one-for-one, then blind our own
/// identifiers in table order.
fn handle_psi(session: &Session, points: &[XCoord]) -> Result<(Vec<XCoord>, Vec<XCoord>)> {
    let double_blinded = session.secret.reblind_all(points)?;
    let own_blinded = session.secret.blind_ids(&session.table.ids())?;
    Ok((double_blinded, own_blinded))
}

/// JOIN: rows whose identifier is in the requested set, in table order
fn handle_join(session: &Session, ids: &[String]) -> Vec<psi_core::table::Row> {
    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    session
        .table
        .rows()
        .iter()
        .filter(|row| row_id(row).is_some_and(|id| wanted.contains(id)))
        .cloned()
        .collect()
}

/// SECURE_AGGREGATION: rebuild the public context, reindex our columns by
/// the initiator's alignment vector, and aggregate per department.
fn handle_secure_aggregation(
    session: &Session,
    context: &[u8],
    enc_salaries: &[u8],
    ids: &[String],
) -> Result<BTreeMap<String, Vec<u8>>> {
    if ids.is_empty() {
        // Empty intersection: nothing to aggregate, not an error.
        return Ok(BTreeMap::new());
    }
    let context = AggContext::deserialize_public(context)?;
    let enc_salaries = context.deserialize_ciphertext(enc_salaries)?;
    agg::aggregate_by_department(&context, &enc_salaries, ids, session.table.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use psi_core::table::{Row, Value, ID_COLUMN};

    fn table() -> Arc<MemTable> {
        let row = |id: &str, bonus: i64| -> Row {
            [
                (ID_COLUMN.to_string(), Value::Text(id.into())),
                ("Department".to_string(), Value::Text("HR".into())),
                ("Bonus".to_string(), Value::Int(bonus)),
            ]
            .into_iter()
            .collect()
        };
        Arc::new(MemTable::new(vec![row("a", 1), row("b", 2), row("c", 3)]))
    }

    fn session() -> Session {
        Session {
            secret: PsiSecret::random(),
            table: table(),
        }
    }

    #[test]
    fn join_filters_in_table_order() {
        let session = session();
        let rows = handle_join(&session, &["c".to_string(), "a".to_string()]);
        let ids: Vec<_> = rows.iter().filter_map(row_id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn join_with_unknown_ids_is_empty() {
        let rows = handle_join(&session(), &["nope".to_string()]);
        assert!(rows.is_empty());
    }

    #[test]
    fn psi_preserves_positional_correspondence() {
        let session = session();
        let initiator = PsiSecret::random();
        let blinded = initiator
            .blind_ids(&["x".to_string(), "y".to_string()])
            .unwrap();

        let (double_blinded, own_blinded) = handle_psi(&session, &blinded).unwrap();
        assert_eq!(double_blinded.len(), 2);
        assert_eq!(own_blinded.len(), 3);

        // Same order as sent: re-deriving each token must match.
        for (sent, doubled) in blinded.iter().zip(&double_blinded) {
            assert_eq!(session.secret.reblind(sent).unwrap(), *doubled);
        }
    }

    #[test]
    fn empty_aggregation_ids_yield_empty_map() {
        let results = handle_secure_aggregation(&session(), b"", b"", &[]).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn garbage_context_is_a_crypto_error() {
        let err = handle_secure_aggregation(&session(), b"junk", b"junk", &["a".to_string()])
            .unwrap_err();
        assert_eq!(err.kind(), psi_core::ErrorKind::CryptoContext);
    }
}
