use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use datamover_domain::entities::{Job, JobElement, JobStatus, JobType, NewElement, NewJob};
use datamover_domain::repositories::{ClaimedJob, JobRepository};
use datamover_domain::selection::SelectionAlgorithm;
use datamover_domain::validation::validate_submission;
use datamover_errors::{DatamoverError, DatamoverResult};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

/// 基于SQLite的作业仓库。
///
/// 领取路径在整个选取事务期间持有进程内互斥锁，被选中的元素在
/// 锁释放前就已置为SUBMITTED，因此并发领取不会重复派发。
pub struct SqliteJobRepository {
    pool: SqlitePool,
    claim_lock: Mutex<()>,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            claim_lock: Mutex::new(()),
        }
    }

    /// 创建嵌入式SQLite作业仓库，自动初始化数据库
    pub async fn new_embedded(database_url: &str, max_connections: u32) -> DatamoverResult<Self> {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
        use std::str::FromStr;

        debug!("Creating embedded SQLite job repository at: {}", database_url);

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .connect_with(connect_options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    /// 内存数据库，仅供测试; 单连接保证所有查询看到同一个库
    pub async fn in_memory() -> DatamoverResult<Self> {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
        use std::str::FromStr;

        let connect_options =
            SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    /// 运行数据库迁移
    pub async fn run_migrations(pool: &SqlitePool) -> DatamoverResult<()> {
        debug!("Running SQLite database migrations");

        // 作业表; 状态/类型/协议存数值，数值顺序即聚合顺序
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                log_uid TEXT NOT NULL UNIQUE,
                type INTEGER NOT NULL,
                priority INTEGER NOT NULL DEFAULT 5 CHECK (priority BETWEEN 0 AND 9),
                protocol INTEGER NOT NULL DEFAULT 0,
                src_siteid INTEGER NOT NULL,
                src_filepath TEXT NOT NULL,
                dst_siteid INTEGER,
                dst_filepath TEXT,
                extra_opts TEXT,
                src_credentials TEXT,
                dst_credentials TEXT,
                status INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        // 元素表; attempts永远不能越过max_tries
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_elements (
                job_id INTEGER NOT NULL,
                element_id INTEGER NOT NULL,
                type INTEGER NOT NULL,
                src_filepath TEXT NOT NULL,
                dst_filepath TEXT,
                size INTEGER NOT NULL DEFAULT 0,
                max_tries INTEGER NOT NULL DEFAULT 2 CHECK (max_tries >= 1),
                attempts INTEGER NOT NULL DEFAULT 0 CHECK (attempts <= max_tries),
                status INTEGER NOT NULL DEFAULT 0,
                token TEXT,
                listing TEXT,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (job_id, element_id),
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_jobs_user_id ON jobs(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
            "CREATE INDEX IF NOT EXISTS idx_job_elements_status ON job_elements(status)",
            "CREATE INDEX IF NOT EXISTS idx_job_elements_type ON job_elements(type)",
        ];
        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await?;
        }

        debug!("Successfully completed SQLite database migrations");
        Ok(())
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> DatamoverResult<Job> {
        Ok(Job {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            log_uid: row.try_get("log_uid")?,
            job_type: row.try_get("type")?,
            priority: row.try_get("priority")?,
            protocol: row.try_get("protocol")?,
            src_siteid: row.try_get("src_siteid")?,
            src_filepath: row.try_get("src_filepath")?,
            dst_siteid: row.try_get("dst_siteid")?,
            dst_filepath: row.try_get("dst_filepath")?,
            extra_opts: row.try_get("extra_opts")?,
            src_credentials: row.try_get("src_credentials")?,
            dst_credentials: row.try_get("dst_credentials")?,
            status: row.try_get("status")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn row_to_element(row: &sqlx::sqlite::SqliteRow) -> DatamoverResult<JobElement> {
        let listing: Option<String> = row.try_get("listing")?;
        let listing = match listing {
            Some(text) => Some(serde_json::from_str(&text)?),
            None => None,
        };
        Ok(JobElement {
            job_id: row.try_get("job_id")?,
            element_id: row.try_get("element_id")?,
            element_type: row.try_get("type")?,
            src_filepath: row.try_get("src_filepath")?,
            dst_filepath: row.try_get("dst_filepath")?,
            size: row.try_get("size")?,
            max_tries: row.try_get("max_tries")?,
            attempts: row.try_get("attempts")?,
            status: row.try_get("status")?,
            token: row.try_get("token")?,
            listing,
            timestamp: row.try_get("timestamp")?,
        })
    }

}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    #[instrument(skip(self, new_job))]
    async fn create_job(&self, user_id: i64, new_job: NewJob) -> DatamoverResult<Job> {
        validate_submission(&new_job)?;
        let src_siteid = new_job
            .src_siteid
            .ok_or_else(|| DatamoverError::validation_error("缺少源站点"))?;
        let src_filepath = new_job
            .src_filepath
            .clone()
            .ok_or_else(|| DatamoverError::validation_error("缺少源路径"))?;

        let log_uid = NewJob::fresh_log_uid();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO jobs (
                user_id, log_uid, type, priority, protocol,
                src_siteid, src_filepath, dst_siteid, dst_filepath,
                extra_opts, src_credentials, dst_credentials, status, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&log_uid)
        .bind(new_job.job_type)
        .bind(new_job.priority)
        .bind(new_job.protocol)
        .bind(src_siteid)
        .bind(&src_filepath)
        .bind(new_job.dst_siteid)
        .bind(&new_job.dst_filepath)
        .bind(&new_job.extra_opts)
        .bind(&new_job.src_credentials)
        .bind(&new_job.dst_credentials)
        .bind(JobStatus::New)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let job = Self::row_to_job(&row)?;

        // 0号种子元素与作业在同一事务内落盘
        let seed_type = job.job_type.seed_element_type();
        sqlx::query(
            r#"
            INSERT INTO job_elements (
                job_id, element_id, type, src_filepath, dst_filepath,
                size, max_tries, attempts, status, timestamp
            ) VALUES (?, 0, ?, ?, ?, 0, ?, 0, ?, ?)
            "#,
        )
        .bind(job.id)
        .bind(seed_type)
        .bind(&job.src_filepath)
        .bind(&job.dst_filepath)
        .bind(new_job.max_tries)
        .bind(JobStatus::New)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Created job {} ({})", job.id, job.job_type.as_str());
        Ok(job)
    }

    async fn get_jobs(&self, user_id: i64) -> DatamoverResult<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE user_id = ? ORDER BY id ASC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn get_job(&self, id: i64, user_id: i64) -> DatamoverResult<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Self::row_to_job(&row),
            None => Err(DatamoverError::job_not_found(id)),
        }
    }

    async fn find_job(&self, id: i64) -> DatamoverResult<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Self::row_to_job(&row),
            None => Err(DatamoverError::job_not_found(id)),
        }
    }

    async fn get_elements(&self, job_id: i64, user_id: i64) -> DatamoverResult<Vec<JobElement>> {
        // 先做属主校验，避免跨用户枚举元素
        self.get_job(job_id, user_id).await?;
        let rows =
            sqlx::query("SELECT * FROM job_elements WHERE job_id = ? ORDER BY element_id ASC")
                .bind(job_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::row_to_element).collect()
    }

    async fn get_element(
        &self,
        job_id: i64,
        element_id: i64,
        user_id: i64,
    ) -> DatamoverResult<JobElement> {
        self.get_job(job_id, user_id).await?;
        self.find_element(job_id, element_id).await
    }

    async fn find_element(&self, job_id: i64, element_id: i64) -> DatamoverResult<JobElement> {
        let row = sqlx::query("SELECT * FROM job_elements WHERE job_id = ? AND element_id = ?")
            .bind(job_id)
            .bind(element_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Self::row_to_element(&row),
            None => Err(DatamoverError::element_not_found(job_id, element_id)),
        }
    }

    #[instrument(skip(self, element), fields(job_id = element.job_id, element_id = element.element_id))]
    async fn update_element(&self, element: &JobElement) -> DatamoverResult<()> {
        if element.attempts > element.max_tries {
            return Err(DatamoverError::RetriesExhausted {
                job_id: element.job_id,
                element_id: element.element_id,
                max_tries: element.max_tries,
            });
        }
        let listing = element
            .listing
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result = sqlx::query(
            r#"
            UPDATE job_elements
            SET type = ?, src_filepath = ?, dst_filepath = ?, size = ?,
                max_tries = ?, attempts = ?, status = ?, token = ?,
                listing = ?, timestamp = ?
            WHERE job_id = ? AND element_id = ?
            "#,
        )
        .bind(element.element_type)
        .bind(&element.src_filepath)
        .bind(&element.dst_filepath)
        .bind(element.size)
        .bind(element.max_tries)
        .bind(element.attempts)
        .bind(element.status)
        .bind(&element.token)
        .bind(&listing)
        .bind(Utc::now())
        .bind(element.job_id)
        .bind(element.element_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatamoverError::element_not_found(
                element.job_id,
                element.element_id,
            ));
        }
        Ok(())
    }

    #[instrument(skip(self, elements), fields(count = elements.len()))]
    async fn add_elements(
        &self,
        job_id: i64,
        elements: Vec<NewElement>,
    ) -> DatamoverResult<Vec<JobElement>> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(DatamoverError::job_not_found(job_id));
        }

        let next_id: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(element_id) + 1, 0) FROM job_elements WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        let now = Utc::now();
        let mut created = Vec::with_capacity(elements.len());
        for (offset, new_element) in elements.into_iter().enumerate() {
            let element_id = next_id + offset as i64;
            sqlx::query(
                r#"
                INSERT INTO job_elements (
                    job_id, element_id, type, src_filepath, dst_filepath,
                    size, max_tries, attempts, status, timestamp
                ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
                "#,
            )
            .bind(job_id)
            .bind(element_id)
            .bind(new_element.element_type)
            .bind(&new_element.src_filepath)
            .bind(&new_element.dst_filepath)
            .bind(new_element.size)
            .bind(new_element.max_tries)
            .bind(JobStatus::New)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            created.push(JobElement {
                job_id,
                element_id,
                element_type: new_element.element_type,
                src_filepath: new_element.src_filepath,
                dst_filepath: new_element.dst_filepath,
                size: new_element.size,
                max_tries: new_element.max_tries,
                attempts: 0,
                status: JobStatus::New,
                token: None,
                listing: None,
                timestamp: now,
            });
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn recompute_job_status(&self, job_id: i64) -> DatamoverResult<JobStatus> {
        let raw: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(status), 0) FROM job_elements WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        let status = JobStatus::from_i64(raw)
            .ok_or_else(|| DatamoverError::Internal(format!("非法的聚合状态值: {raw}")))?;

        let result = sqlx::query("UPDATE jobs SET status = ?, timestamp = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatamoverError::job_not_found(job_id));
        }
        Ok(status)
    }

    async fn set_job_status(&self, job_id: i64, status: JobStatus) -> DatamoverResult<()> {
        let result = sqlx::query("UPDATE jobs SET status = ?, timestamp = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatamoverError::job_not_found(job_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_elements(
        &self,
        types: &[JobType],
        algorithm: SelectionAlgorithm,
    ) -> DatamoverResult<Vec<ClaimedJob>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }

        // 选取事务全程互斥，杜绝同一元素被两个Worker领走
        let _guard = self.claim_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let placeholders = vec!["?"; types.len()].join(", ");
        let order_tail = if algorithm.orders_by_size() {
            ", e.size DESC"
        } else {
            ""
        };
        let sql = format!(
            "SELECT e.* FROM job_elements e \
             JOIN jobs j ON j.id = e.job_id \
             WHERE e.status IN (?, ?) AND e.attempts < e.max_tries \
               AND e.type IN ({placeholders}) \
             ORDER BY j.priority ASC, e.job_id ASC, e.status ASC{order_tail}, e.element_id ASC \
             LIMIT ?"
        );
        let mut query = sqlx::query(&sql)
            .bind(JobStatus::New)
            .bind(JobStatus::Failed);
        for job_type in types {
            query = query.bind(*job_type);
        }
        query = query.bind(algorithm.scan_limit() as i64);
        let rows = query.fetch_all(&mut *tx).await?;
        let candidates = rows
            .iter()
            .map(Self::row_to_element)
            .collect::<DatamoverResult<Vec<_>>>()?;

        let chosen = algorithm.apply(candidates);
        if chosen.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut grouped: BTreeMap<i64, Vec<JobElement>> = BTreeMap::new();
        for mut element in chosen {
            let token = Uuid::new_v4().to_string();
            sqlx::query(
                "UPDATE job_elements SET status = ?, token = ?, timestamp = ? \
                 WHERE job_id = ? AND element_id = ?",
            )
            .bind(JobStatus::Submitted)
            .bind(&token)
            .bind(now)
            .bind(element.job_id)
            .bind(element.element_id)
            .execute(&mut *tx)
            .await?;
            element.status = JobStatus::Submitted;
            element.token = Some(token);
            element.timestamp = now;
            grouped.entry(element.job_id).or_default().push(element);
        }

        let mut result = Vec::with_capacity(grouped.len());
        for (job_id, elements) in grouped {
            // 领取后作业整体立刻显示为SUBMITTED
            let raw: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(status), 0) FROM job_elements WHERE job_id = ?",
            )
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;
            sqlx::query("UPDATE jobs SET status = ?, timestamp = ? WHERE id = ?")
                .bind(raw)
                .bind(now)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
                .bind(job_id)
                .fetch_one(&mut *tx)
                .await?;
            result.push(ClaimedJob {
                job: Self::row_to_job(&row)?,
                elements,
            });
        }

        tx.commit().await?;
        debug!(
            "Claimed {} elements across {} jobs",
            result.iter().map(|c| c.elements.len()).sum::<usize>(),
            result.len()
        );
        Ok(result)
    }
}
