use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_postgres::{Client, GenericClient, IsolationLevel, NoTls, Row};
use uuid::Uuid;

use crate::model::*;

use super::{RotaSnapshot, Scope, ShiftSnapshot, ShiftSource, StoreError};

const SELECT_SHIFTS: &str = "SELECT id, member_id, day, in_time, out_time FROM shifts";
const SELECT_MEMBER_SHIFTS: &str =
    "SELECT id, member_id, day, in_time, out_time FROM shifts WHERE member_id = $1";
const SELECT_PROJECT_SHIFTS: &str = "SELECT s.id, s.member_id, s.day, s.in_time, s.out_time \
     FROM shifts s JOIN members m ON m.member_id = s.member_id \
     WHERE m.project_id = $1";

const SELECT_MEMBERS: &str = "SELECT member_id, project_id, role, age_band FROM members";
const SELECT_PROJECT_MEMBERS: &str =
    "SELECT member_id, project_id, role, age_band FROM members WHERE project_id = $1";
const SELECT_MEMBER: &str =
    "SELECT member_id, project_id, role, age_band FROM members WHERE member_id = $1";

/// Reads the `shifts` and `members` tables through an injected client.
pub struct PgShiftSource {
    // Transactions need `&mut Client`.
    client: Mutex<Client>,
}

impl PgShiftSource {
    pub fn new(client: Client) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }

    /// Connect and drive the connection on a background task.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await.map_err(unavailable)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("postgres connection error: {e}");
            }
        });
        Ok(Self::new(client))
    }
}

fn unavailable(e: tokio_postgres::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn decode_shift(row: &Row) -> Result<ShiftRow, StoreError> {
    let malformed = |e: tokio_postgres::Error| StoreError::Malformed(format!("shifts: {e}"));
    Ok(ShiftRow {
        id: row.try_get::<_, Uuid>("id").map_err(malformed)?,
        member_id: row.try_get::<_, Uuid>("member_id").map_err(malformed)?,
        day: row.try_get::<_, i16>("day").map_err(malformed)?,
        in_time: row.try_get::<_, i16>("in_time").map_err(malformed)?,
        out_time: row.try_get::<_, i16>("out_time").map_err(malformed)?,
    })
}

fn decode_member(row: &Row) -> Result<(MemberId, Membership), StoreError> {
    let malformed = |e: tokio_postgres::Error| StoreError::Malformed(format!("members: {e}"));
    let id: Uuid = row.try_get("member_id").map_err(malformed)?;
    let project_id: Uuid = row.try_get("project_id").map_err(malformed)?;
    let role: String = row.try_get("role").map_err(malformed)?;
    let age_band: Option<String> = row.try_get("age_band").map_err(malformed)?;
    let kind = parse_member_kind(&role, age_band.as_deref())?;
    Ok((id, Membership { project_id, kind }))
}

/// Decode the `role` / `age_band` text columns of a member row.
pub fn parse_member_kind(role: &str, age_band: Option<&str>) -> Result<MemberKind, StoreError> {
    match (role, age_band) {
        ("staff", _) => Ok(MemberKind::Staff),
        ("child", Some(band)) => band
            .parse::<AgeBand>()
            .map(|age_band| MemberKind::Child { age_band })
            .map_err(StoreError::Malformed),
        ("child", None) => Err(StoreError::Malformed("child without age_band".into())),
        (other, _) => Err(StoreError::Malformed(format!("unknown role: {other}"))),
    }
}

async fn read_shifts<C: GenericClient + Sync>(client: &C, scope: Scope) -> Result<ShiftSnapshot, StoreError> {
    let rows = match scope {
        Scope::All => client.query(SELECT_SHIFTS, &[]).await,
        Scope::Project(p) => client.query(SELECT_PROJECT_SHIFTS, &[&p]).await,
        Scope::Member(m) => client.query(SELECT_MEMBER_SHIFTS, &[&m]).await,
    }
    .map_err(unavailable)?;
    let shifts = rows.iter().map(decode_shift).collect::<Result<Vec<_>, _>>()?;
    Ok(ShiftSnapshot::new(shifts))
}

async fn read_roster<C: GenericClient + Sync>(client: &C, scope: Scope) -> Result<Roster, StoreError> {
    let rows = match scope {
        Scope::All => client.query(SELECT_MEMBERS, &[]).await,
        Scope::Project(p) => client.query(SELECT_PROJECT_MEMBERS, &[&p]).await,
        Scope::Member(m) => client.query(SELECT_MEMBER, &[&m]).await,
    }
    .map_err(unavailable)?;
    rows.iter().map(decode_member).collect()
}

#[async_trait]
impl ShiftSource for PgShiftSource {
    async fn load(&self, member_id: Option<MemberId>) -> Result<ShiftSnapshot, StoreError> {
        let scope = member_id.map_or(Scope::All, Scope::Member);
        let client = self.client.lock().await;
        read_shifts(&*client, scope).await
    }

    async fn roster(&self) -> Result<Roster, StoreError> {
        let client = self.client.lock().await;
        read_roster(&*client, Scope::All).await
    }

    /// Both reads run in one read-only repeatable-read transaction.
    async fn snapshot(&self, scope: Scope) -> Result<RotaSnapshot, StoreError> {
        let mut client = self.client.lock().await;
        let tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()
            .await
            .map_err(unavailable)?;
        let shifts = read_shifts(&tx, scope).await?;
        let roster = read_roster(&tx, scope).await?;
        tx.commit().await.map_err(unavailable)?;
        Ok(RotaSnapshot { shifts, roster })
    }
}
