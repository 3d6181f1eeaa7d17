//! Persists telemetry samples to SQL, batched and strictly fire-and-forget
//! from the monitor's point of view: a failed commit keeps the samples
//! queued and the monitor never blocks on database latency.

use crate::monitor::Sample;
use crate::prelude::*;
use sqlx::any::AnyConnectOptions;
use sqlx::{Any, Pool};
use std::sync::RwLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum ChannelData {
    Sample(Box<Sample>),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;

enum DatabaseType {
    Postgres,
    Sqlite,
}

const DRAIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct Database {
    config: Config,
    channels: Channels,
    pool: Arc<RwLock<Option<Pool<Any>>>>,
}

impl Database {
    pub fn new(config: Config, channels: Channels) -> Self {
        Self {
            config,
            channels,
            pool: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn start(&self) -> Result<()> {
        info!("initializing database");

        sqlx::any::install_default_drivers();
        self.connect().await?;
        self.migrate().await?;

        self.inserter().await?;

        info!("database loop exiting");

        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_database.send(ChannelData::Shutdown);
    }

    fn url(&self) -> Result<&str> {
        self.config
            .database_url()
            .ok_or_else(|| anyhow!("no database url configured"))
    }

    fn database(&self) -> Result<DatabaseType> {
        let url = self.url()?;
        let prefix: Vec<&str> = url.splitn(2, ':').collect();
        match prefix[0] {
            "sqlite" => Ok(DatabaseType::Sqlite),
            "postgres" => Ok(DatabaseType::Postgres),
            _ => Err(anyhow!("unsupported database {}", url)),
        }
    }

    async fn connect(&self) -> Result<()> {
        let options = AnyConnectOptions::from_str(self.url()?)?;
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;
        *self
            .pool
            .write()
            .map_err(|_| anyhow!("failed to acquire write lock"))? = Some(pool);
        Ok(())
    }

    async fn connection(&self) -> Result<Pool<Any>> {
        match &*self
            .pool
            .read()
            .map_err(|_| anyhow!("failed to acquire read lock"))?
        {
            Some(pool) => Ok(pool.clone()),
            None => Err(anyhow!("database not connected")),
        }
    }

    async fn migrate(&self) -> Result<()> {
        use DatabaseType::*;

        let pool = self.connection().await?;

        let migrator = match self.database()? {
            Sqlite => sqlx::migrate!("db/migrations/sqlite"),
            Postgres => sqlx::migrate!("db/migrations/postgres"),
        };

        migrator.run(&pool).await?;

        Ok(())
    }

    /// Drain the broadcast queue into a private pending list, and commit it
    /// once it has accumulated a full write interval (or immediately for the
    /// first-ever write, so a fresh install shows data right away). Failed
    /// commits retain the pending list for the next cycle.
    async fn inserter(&self) -> Result<()> {
        let mut receiver = self.channels.to_database.subscribe();
        let mut pending: Vec<Sample> = Vec::new();
        let mut has_written = false;

        loop {
            let mut shutdown = false;
            loop {
                match receiver.try_recv() {
                    Ok(ChannelData::Sample(sample)) => pending.push(*sample),
                    Ok(ChannelData::Shutdown) => {
                        shutdown = true;
                        break;
                    }
                    Err(broadcast::error::TryRecvError::Empty) => break,
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        warn!("database queue lagged, {} samples lost", n);
                    }
                    Err(broadcast::error::TryRecvError::Closed) => {
                        shutdown = true;
                        break;
                    }
                }
            }

            let due = !pending.is_empty()
                && (pending.len() >= self.config.sample_write_interval()
                    || !has_written
                    || shutdown);

            if due {
                match self.insert_batch(&pending).await {
                    Ok(()) => {
                        debug!("committed {} samples", pending.len());
                        has_written = true;
                        pending.clear();
                    }
                    Err(err) => {
                        error!("INSERT failed: {:?} - {} samples retained", err, pending.len());
                    }
                }
            }

            if shutdown {
                break;
            }
            tokio::time::sleep(DRAIN_INTERVAL).await;
        }

        Ok(())
    }

    async fn insert_batch(&self, samples: &[Sample]) -> Result<()> {
        let pool = self.connection().await?;
        let mut conn = pool.acquire().await?;

        // Primary key is the sample time; a conflicting row is skipped.
        let (prefix, suffix) = match self.database()? {
            DatabaseType::Sqlite => ("INSERT OR IGNORE INTO", ""),
            DatabaseType::Postgres => ("INSERT INTO", " ON CONFLICT (time) DO NOTHING"),
        };
        let query_str = format!(
            "{} readings ({}) VALUES {}{}",
            prefix,
            Self::columns(),
            self.values(samples.len())?,
            suffix
        );

        let mut query = sqlx::query(&query_str);
        for s in samples {
            let q = &s.qpigs;
            query = query
                .bind(s.time)
                .bind(q.ac_in_v as f64)
                .bind(q.ac_in_hz as f64)
                .bind(q.ac_out_v as f64)
                .bind(q.ac_out_hz as f64)
                .bind(q.load_va as f64)
                .bind(q.load_w as f64)
                .bind(q.load_p as f64)
                .bind(q.bus_v as f64)
                .bind(q.bat_v as f64)
                .bind(q.bat_ch_a as f64)
                .bind(q.bat_p as f64)
                .bind(q.temp as f64)
                .bind(q.pv_a as f64)
                .bind(q.pv_v as f64)
                .bind(q.pv_w as f64)
                .bind(q.aux_1 as f64)
                .bind(q.aux_2.clone())
                .bind(q.aux_3.clone())
                .bind(q.aux_4.clone())
                .bind(q.aux_5.clone())
                .bind(q.aux_6.clone())
                .bind(s.heavy);
        }
        query.execute(&mut *conn).await?;

        Ok(())
    }

    fn columns() -> &'static str {
        "time, acInV, acInHz, acOutV, acOutHz, loadVA, loadW, loadP, busV, batV, batChA, \
         batP, temp, pvA, pvV, pvW, aux1, aux2, aux3, aux4, aux5, aux6, heavy"
    }

    const COLUMN_COUNT: usize = 23;

    /// Placeholder rows for the batch. SQLite uses `?`, postgres `$n`;
    /// SQLite additionally spells conflict-skip as INSERT OR IGNORE.
    fn values(&self, rows: usize) -> Result<String> {
        let row = |base: usize| -> String {
            let fields: Vec<String> = (0..Self::COLUMN_COUNT)
                .map(|i| match self.database() {
                    Ok(DatabaseType::Postgres) => format!("${}", base + i + 1),
                    _ => "?".to_string(),
                })
                .collect();
            format!("({})", fields.join(", "))
        };
        let rows: Vec<String> = (0..rows).map(|r| row(r * Self::COLUMN_COUNT)).collect();
        Ok(rows.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database(url: &str) -> Database {
        let yaml = format!("database_url: \"{}\"", url);
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        Database::new(config, Channels::new())
    }

    #[test]
    fn detects_backend_from_url() {
        assert!(matches!(
            database("sqlite:power.db").database().unwrap(),
            DatabaseType::Sqlite
        ));
        assert!(matches!(
            database("postgres://pi@localhost/power").database().unwrap(),
            DatabaseType::Postgres
        ));
        assert!(database("mysql://nope/power").database().is_err());
    }

    #[test]
    fn postgres_placeholders_are_numbered() {
        let db = database("postgres://pi@localhost/power");
        let v = db.values(2).unwrap();
        assert!(v.starts_with("($1, $2,"));
        assert!(v.contains("($24, $25,"));
        assert!(v.ends_with("$46)"));
    }

    #[test]
    fn sqlite_placeholders_are_anonymous() {
        let db = database("sqlite:power.db");
        let v = db.values(1).unwrap();
        assert_eq!(v.matches('?').count(), 23);
    }
}
