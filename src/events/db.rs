//! Durable event store on SQLite.
//!
//! `EventDb` is the sink side: every event becomes one row, inserted through
//! cached prepared statements, with one DB transaction per logger drain
//! pass. `DbEventSource` is the read side used for post-hoc replay.
//!
//! A failed insert is logged and the run continues; the store is diagnostic
//! output, not part of the measurement path.

use log::error;
use rusqlite::{Connection, OpenFlags, params};
use std::path::Path;

use crate::error::PerfError;
use crate::events::sink::EventSink;
use crate::events::source::EventSource;
use crate::events::{
    EndpointId, EventMessageReceived, EventMessageSent, EventRegisterPub, EventRegisterSub,
    EventSystemMeasured,
};
use crate::utils::cpu_usage::{CpuInfo, ResourceUsage};

const SQL_INIT_DB_SCHEMA: &str = "
    DROP TABLE IF EXISTS publishers;
    CREATE TABLE publishers(
      id TEXT PRIMARY KEY,
      msg_type TEXT,
      topic TEXT
    );
    DROP TABLE IF EXISTS subscribers;
    CREATE TABLE subscribers(
      id TEXT PRIMARY KEY,
      msg_type TEXT,
      topic TEXT,
      data_size INT
    );
    DROP TABLE IF EXISTS messages_sent;
    CREATE TABLE messages_sent(
      publisher_id TEXT,
      sequence_id INT,
      timestamp INT,
      PRIMARY KEY(publisher_id, sequence_id)
    );
    DROP TABLE IF EXISTS messages_received;
    CREATE TABLE messages_received(
      subscriber_id TEXT,
      publisher_id TEXT,
      sequence_id INT,
      timestamp INT,
      PRIMARY KEY(subscriber_id, publisher_id, sequence_id)
    );
    DROP TABLE IF EXISTS system_metrics;
    CREATE TABLE system_metrics(
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      cpu_cores INT,
      cpu_usage FLOAT,
      ru_utime INT,
      ru_stime INT,
      ru_maxrss INT,
      ru_ixrss INT,
      ru_idrss INT,
      ru_isrss INT,
      ru_minflt INT,
      ru_majflt INT,
      ru_nswap INT,
      ru_inblock INT,
      ru_oublock INT,
      ru_msgsnd INT,
      ru_msgrcv INT,
      ru_nsignals INT,
      ru_nvcsw INT,
      ru_nivcsw INT,
      timestamp INT
    );
";

const SQL_INSERT_PUBLISHER: &str =
    "INSERT INTO publishers (id, msg_type, topic) VALUES (?1, ?2, ?3)";

const SQL_INSERT_SUBSCRIBER: &str =
    "INSERT INTO subscribers (id, msg_type, topic, data_size) VALUES (?1, ?2, ?3, ?4)";

const SQL_INSERT_MESSAGE_SENT: &str =
    "INSERT INTO messages_sent (publisher_id, sequence_id, timestamp) VALUES (?1, ?2, ?3)";

const SQL_INSERT_MESSAGE_RECEIVED: &str = "INSERT INTO messages_received \
     (subscriber_id, publisher_id, sequence_id, timestamp) VALUES (?1, ?2, ?3, ?4)";

const SQL_INSERT_SYSTEM_MEASURED: &str = "INSERT INTO system_metrics \
     (cpu_cores, cpu_usage, ru_utime, ru_stime, ru_maxrss, ru_ixrss, ru_idrss, ru_isrss, \
      ru_minflt, ru_majflt, ru_nswap, ru_inblock, ru_oublock, ru_msgsnd, ru_msgrcv, \
      ru_nsignals, ru_nvcsw, ru_nivcsw, timestamp) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)";

pub struct EventDb {
    conn: Connection,
}

impl EventDb {
    /// Creates (or wipes) the event log at `path` and prepares the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PerfError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SQL_INIT_DB_SCHEMA)?;
        Ok(Self { conn })
    }

    fn execute(&self, statement: &str) {
        if let Err(e) = self.conn.execute_batch(statement) {
            error!("SQL error on '{}': {}", statement, e);
        }
    }

    fn insert_register_pub(&self, event: &EventRegisterPub) -> rusqlite::Result<()> {
        let mut stmt = self.conn.prepare_cached(SQL_INSERT_PUBLISHER)?;
        stmt.execute(params![
            event.pub_id.as_str(),
            event.msg_type,
            event.topic
        ])?;
        Ok(())
    }

    fn insert_register_sub(&self, event: &EventRegisterSub) -> rusqlite::Result<()> {
        let mut stmt = self.conn.prepare_cached(SQL_INSERT_SUBSCRIBER)?;
        stmt.execute(params![
            event.sub_id.as_str(),
            event.msg_type,
            event.topic,
            event.data_size as i64
        ])?;
        Ok(())
    }

    fn insert_message_sent(&self, event: &EventMessageSent) -> rusqlite::Result<()> {
        let mut stmt = self.conn.prepare_cached(SQL_INSERT_MESSAGE_SENT)?;
        stmt.execute(params![
            event.pub_id.as_str(),
            event.sequence_id as i64,
            event.timestamp
        ])?;
        Ok(())
    }

    fn insert_message_received(&self, event: &EventMessageReceived) -> rusqlite::Result<()> {
        let mut stmt = self.conn.prepare_cached(SQL_INSERT_MESSAGE_RECEIVED)?;
        stmt.execute(params![
            event.sub_id.as_str(),
            event.pub_id.as_str(),
            event.sequence_id as i64,
            event.timestamp
        ])?;
        Ok(())
    }

    fn insert_system_measured(&self, event: &EventSystemMeasured) -> rusqlite::Result<()> {
        let ru = &event.resource_usage;
        let mut stmt = self.conn.prepare_cached(SQL_INSERT_SYSTEM_MEASURED)?;
        stmt.execute(params![
            event.cpu_info.cpu_cores,
            event.cpu_info.cpu_usage as f64,
            ru.utime_ns,
            ru.stime_ns,
            ru.maxrss,
            ru.ixrss,
            ru.idrss,
            ru.isrss,
            ru.minflt,
            ru.majflt,
            ru.nswap,
            ru.inblock,
            ru.oublock,
            ru.msgsnd,
            ru.msgrcv,
            ru.nsignals,
            ru.nvcsw,
            ru.nivcsw,
            event.timestamp
        ])?;
        Ok(())
    }
}

impl EventSink for EventDb {
    fn begin_transaction(&mut self) {
        self.execute("BEGIN TRANSACTION");
    }

    fn end_transaction(&mut self) {
        self.execute("COMMIT TRANSACTION");
    }

    fn register_pub(&mut self, event: &EventRegisterPub) {
        if let Err(e) = self.insert_register_pub(event) {
            error!("failed to persist publisher {}: {}", event.pub_id, e);
        }
    }

    fn register_sub(&mut self, event: &EventRegisterSub) {
        if let Err(e) = self.insert_register_sub(event) {
            error!("failed to persist subscriber {}: {}", event.sub_id, e);
        }
    }

    fn message_sent(&mut self, event: &EventMessageSent) {
        if let Err(e) = self.insert_message_sent(event) {
            error!(
                "failed to persist sent ({}, {}): {}",
                event.pub_id, event.sequence_id, e
            );
        }
    }

    fn message_received(&mut self, event: &EventMessageReceived) {
        if let Err(e) = self.insert_message_received(event) {
            error!(
                "failed to persist received ({}, {}, {}): {}",
                event.sub_id, event.pub_id, event.sequence_id, e
            );
        }
    }

    fn system_measured(&mut self, event: &EventSystemMeasured) {
        if let Err(e) = self.insert_system_measured(event) {
            error!("failed to persist system metrics: {}", e);
        }
    }
}

/// Read-only view over a persisted event log.
pub struct DbEventSource {
    conn: Connection,
}

impl DbEventSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PerfError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }
}

impl EventSource for DbEventSource {
    fn query_register_pub(&self, topic: &str) -> Result<Vec<EventRegisterPub>, PerfError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, msg_type, topic FROM publishers WHERE topic = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![topic], |row| {
            Ok(EventRegisterPub {
                pub_id: EndpointId::from(row.get::<_, String>(0)?),
                msg_type: row.get(1)?,
                topic: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn query_register_sub(&self, topic: &str) -> Result<Vec<EventRegisterSub>, PerfError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, msg_type, topic, data_size FROM subscribers WHERE topic = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![topic], |row| {
            Ok(EventRegisterSub {
                sub_id: EndpointId::from(row.get::<_, String>(0)?),
                msg_type: row.get(1)?,
                topic: row.get(2)?,
                data_size: row.get::<_, i64>(3)? as usize,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn query_message_sent(
        &self,
        start: i64,
        end: i64,
        topic: &str,
    ) -> Result<Vec<EventMessageSent>, PerfError> {
        let mut stmt = self.conn.prepare(
            "SELECT m.publisher_id, m.sequence_id, m.timestamp \
             FROM messages_sent m JOIN publishers p ON p.id = m.publisher_id \
             WHERE p.topic = ?1 AND m.timestamp >= ?2 AND m.timestamp < ?3 \
             ORDER BY m.timestamp, m.sequence_id",
        )?;
        let rows = stmt.query_map(params![topic, start, end], |row| {
            Ok(EventMessageSent {
                pub_id: EndpointId::from(row.get::<_, String>(0)?),
                sequence_id: row.get::<_, i64>(1)? as u64,
                timestamp: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn query_message_received(
        &self,
        start: i64,
        end: i64,
        topic: &str,
    ) -> Result<Vec<EventMessageReceived>, PerfError> {
        let mut stmt = self.conn.prepare(
            "SELECT m.subscriber_id, m.publisher_id, m.sequence_id, m.timestamp \
             FROM messages_received m JOIN subscribers s ON s.id = m.subscriber_id \
             WHERE s.topic = ?1 AND m.timestamp >= ?2 AND m.timestamp < ?3 \
             ORDER BY m.timestamp, m.sequence_id",
        )?;
        let rows = stmt.query_map(params![topic, start, end], |row| {
            Ok(EventMessageReceived {
                sub_id: EndpointId::from(row.get::<_, String>(0)?),
                pub_id: EndpointId::from(row.get::<_, String>(1)?),
                sequence_id: row.get::<_, i64>(2)? as u64,
                timestamp: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn query_system_measured(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<EventSystemMeasured>, PerfError> {
        let mut stmt = self.conn.prepare(
            "SELECT cpu_cores, cpu_usage, ru_utime, ru_stime, ru_maxrss, ru_ixrss, ru_idrss, \
             ru_isrss, ru_minflt, ru_majflt, ru_nswap, ru_inblock, ru_oublock, ru_msgsnd, \
             ru_msgrcv, ru_nsignals, ru_nvcsw, ru_nivcsw, timestamp \
             FROM system_metrics WHERE timestamp >= ?1 AND timestamp < ?2 ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![start, end], |row| {
            Ok(EventSystemMeasured {
                cpu_info: CpuInfo {
                    cpu_cores: row.get::<_, i64>(0)? as u32,
                    cpu_usage: row.get::<_, f64>(1)? as f32,
                },
                resource_usage: ResourceUsage {
                    utime_ns: row.get(2)?,
                    stime_ns: row.get(3)?,
                    maxrss: row.get(4)?,
                    ixrss: row.get(5)?,
                    idrss: row.get(6)?,
                    isrss: row.get(7)?,
                    minflt: row.get(8)?,
                    majflt: row.get(9)?,
                    nswap: row.get(10)?,
                    inblock: row.get(11)?,
                    oublock: row.get(12)?,
                    msgsnd: row.get(13)?,
                    msgrcv: row.get(14)?,
                    nsignals: row.get(15)?,
                    nvcsw: row.get(16)?,
                    nivcsw: row.get(17)?,
                },
                timestamp: row.get(18)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn time_bounds(&self) -> Result<Option<(i64, i64)>, PerfError> {
        let mut stmt = self.conn.prepare(
            "SELECT MIN(first), MAX(last) FROM ( \
               SELECT MIN(timestamp) AS first, MAX(timestamp) AS last FROM messages_sent \
               UNION ALL \
               SELECT MIN(timestamp), MAX(timestamp) FROM messages_received)",
        )?;
        let bounds = stmt.query_row([], |row| {
            let min: Option<i64> = row.get(0)?;
            let max: Option<i64> = row.get(1)?;
            Ok(min.zip(max))
        })?;
        Ok(bounds)
    }
}
