//! Initiator-side sequential protocol driver.
//!
//! Steps run in a fixed order: `connect → run_psi → run_join →
//! aggregate`. A step whose predecessor has not completed fails locally
//! with `PreconditionUnmet` before any network I/O. Each connected client
//! owns a fresh blinding secret; reconnecting starts a new session.

use std::collections::{BTreeMap, BTreeSet};

use psi_core::{
    agg::{round_aggregate, AggContext},
    psi::{self, PsiSecret},
    table::{self, column_is_integral, MemTable, Row, Table, Value},
    Error, Result, XCoord,
};
use psi_wire::{Request, Response};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

/// Initiator session: connection, blinding secret, data, and progress
pub struct Client {
    stream: TcpStream,
    secret: PsiSecret,
    table: MemTable,
    intersection: Option<Vec<String>>,
    joined: Option<Vec<Row>>,
}

impl Client {
    /// Connect to a responder, carrying this party's table
    #[instrument(skip(table), fields(rows = table.len()))]
    pub async fn connect(host: &str, port: u16, table: MemTable) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Transport(format!("connect {host}:{port}: {e}")))?;
        info!(host, port, "connected to responder");
        Ok(Self {
            stream,
            secret: PsiSecret::random(),
            table,
            intersection: None,
            joined: None,
        })
    }

    pub fn table(&self) -> &MemTable {
        &self.table
    }

    /// Intersection from the last completed PSI, in this party's input order
    pub fn intersection(&self) -> Option<&[String]> {
        self.intersection.as_deref()
    }

    /// Run the four-message PSI exchange and compute the intersection
    #[instrument(skip(self))]
    pub async fn run_psi(&mut self) -> Result<Vec<String>> {
        let ids = self.table.ids();
        let blinded = self.secret.blind_ids(&ids)?;

        psi_wire::send(&mut self.stream, &Request::Psi { points: blinded }).await?;

        // Message 2: our points double-blinded, positionally aligned.
        let double_blinded = self.expect_points().await?;
        if double_blinded.len() != ids.len() {
            return Err(Error::Protocol(format!(
                "expected {} double-blinded points, got {}",
                ids.len(),
                double_blinded.len()
            )));
        }

        // Message 3: the responder's own blinded points; we finish them.
        let peer_blinded = self.expect_points().await?;
        let peer_doubled = self.secret.reblind_all(&peer_blinded)?;

        let intersection = psi::intersect(&ids, &double_blinded, &peer_doubled);
        info!(
            own = ids.len(),
            peer = peer_blinded.len(),
            matched = intersection.len(),
            "PSI completed"
        );

        self.intersection = Some(intersection.clone());
        self.joined = None;
        Ok(intersection)
    }

    /// Fetch the responder rows for the intersection and join them with our
    /// own columns
    #[instrument(skip(self))]
    pub async fn run_join(&mut self) -> Result<Vec<Row>> {
        let ids = self
            .intersection
            .clone()
            .ok_or_else(|| Error::PreconditionUnmet("JOIN requires a completed PSI".into()))?;

        psi_wire::send(&mut self.stream, &Request::Join { ids }).await?;
        let data = match self.recv_response().await? {
            Response::Rows { data } => data,
            other => return Err(unexpected("rows", &other)),
        };
        debug!(rows = data.len(), "received responder rows");

        let joined = table::inner_join(&self.table, &data);
        info!(rows = joined.len(), "join completed");
        self.joined = Some(joined.clone());
        Ok(joined)
    }

    /// Plaintext aggregation over the joined rows: total compensation per
    /// department
    pub fn aggregate_plain(&self) -> Result<BTreeMap<String, f64>> {
        let joined = self.joined.as_ref().ok_or_else(|| {
            Error::PreconditionUnmet("plain aggregation requires a completed JOIN".into())
        })?;
        table::group_sum(joined, "Department", &["Salary", "Bonus"])
    }

    /// Encrypted aggregation: ship the public context and the encrypted
    /// salary vector, let the responder mask and sum per department, and
    /// decrypt the returned slot-0 totals.
    #[instrument(skip(self))]
    pub async fn run_secure_aggregation(&mut self) -> Result<BTreeMap<String, f64>> {
        let intersection = self.intersection.as_ref().ok_or_else(|| {
            Error::PreconditionUnmet("SECURE_AGGREGATION requires a completed PSI".into())
        })?;

        // Canonical alignment vector: ascending by UTF-8 bytes, deduplicated
        // so the reindex on the far side is well defined.
        let ids: Vec<String> = intersection
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if ids.is_empty() {
            // Nothing to encrypt; the responder answers with an empty map.
            psi_wire::send(
                &mut self.stream,
                &Request::SecureAggregation {
                    context: Vec::new(),
                    enc_salaries: Vec::new(),
                    ids,
                },
            )
            .await?;
            return match self.recv_response().await? {
                Response::Aggregates { results } if results.is_empty() => Ok(BTreeMap::new()),
                Response::Aggregates { .. } => Err(Error::Protocol(
                    "aggregates returned for an empty intersection".into(),
                )),
                other => Err(unexpected("aggregates", &other)),
            };
        }

        let salaries = self.gather_salaries(&ids)?;
        let integral = column_is_integral(self.table.rows(), "Salary");

        let context = AggContext::create()?;
        let enc_salaries = context.encrypt_vector(&salaries)?;
        debug!(slots = salaries.len(), "salary vector encrypted");

        psi_wire::send(
            &mut self.stream,
            &Request::SecureAggregation {
                context: context.serialize_public()?,
                enc_salaries: context.serialize_ciphertext(&enc_salaries)?,
                ids,
            },
        )
        .await?;

        let results = match self.recv_response().await? {
            Response::Aggregates { results } => results,
            other => return Err(unexpected("aggregates", &other)),
        };

        let mut totals = BTreeMap::new();
        for (department, bytes) in results {
            let ciphertext = context.deserialize_ciphertext(&bytes)?;
            let value = context.decrypt_slot0(&ciphertext)?;
            totals.insert(department, round_aggregate(value, integral));
        }
        info!(departments = totals.len(), "secure aggregation completed");
        Ok(totals)
    }

    /// Send EXIT and drop the connection
    pub async fn exit(mut self) -> Result<()> {
        psi_wire::send(&mut self.stream, &Request::Exit).await?;
        info!("session closed");
        Ok(())
    }

    fn gather_salaries(&self, ids: &[String]) -> Result<Vec<f64>> {
        ids.iter()
            .map(|id| {
                self.table
                    .get(id)
                    .and_then(|row| row.get("Salary"))
                    .and_then(Value::as_real)
                    .ok_or_else(|| {
                        Error::Alignment(format!("id {id:?} lacks a numeric Salary"))
                    })
            })
            .collect()
    }

    async fn expect_points(&mut self) -> Result<Vec<XCoord>> {
        match self.recv_response().await? {
            Response::Points { points } => Ok(points),
            other => Err(unexpected("points", &other)),
        }
    }

    /// Receive one response, surfacing a wire error as the matching local
    /// error kind
    async fn recv_response(&mut self) -> Result<Response> {
        match psi_wire::recv::<_, Response>(&mut self.stream).await? {
            Some(Response::Error { error, message }) => Err(Error::from_wire(&error, message)),
            Some(response) => Ok(response),
            None => Err(Error::Transport("responder closed the connection".into())),
        }
    }
}

fn unexpected(wanted: &str, got: &Response) -> Error {
    Error::Protocol(format!(
        "expected a {wanted} response, got {}",
        got.label()
    ))
}
