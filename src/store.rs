//! SQLiteエラーログストア
//!
//! 捕捉した実行時エラーの追記・一覧取得機能を提供する。
//! - 書き込み: 専用の単一接続（Arc<Mutex<Connection>>）
//! - 読み取り: deadpool-sqliteによるasync接続プール

use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ストアエラー
#[derive(Debug, Error)]
pub enum StoreError {
    /// データベースエラー
    #[error("データベースエラー: {0}")]
    Database(String),

    /// プール取得エラー
    #[error("プールエラー: {0}")]
    Pool(String),

    /// 接続構築エラー
    #[error("接続構築エラー: {0}")]
    Build(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<deadpool_sqlite::BuildError> for StoreError {
    fn from(err: deadpool_sqlite::BuildError) -> Self {
        StoreError::Build(err.to_string())
    }
}

impl From<deadpool_sqlite::PoolError> for StoreError {
    fn from(err: deadpool_sqlite::PoolError) -> Self {
        StoreError::Pool(err.to_string())
    }
}

impl From<deadpool_sqlite::InteractError> for StoreError {
    fn from(err: deadpool_sqlite::InteractError) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// 保存済みエラーレコード
///
/// `error_logs`テーブルの1行に対応する。挿入後は不変で、
/// 更新・削除の経路は存在しない。`GET /logs`のレスポンスにも使用する。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    /// ストアが採番する単調増加ID
    pub id: i64,
    /// 例外種別（例: "ZeroDivisionError", "IndexError"）
    pub exception_type: String,
    /// 人間可読なエラーメッセージ
    pub message: String,
    /// 捕捉時点のバックトレース（そのまま保存）
    pub stacktrace: String,
    /// 捕捉時刻（UTC）
    pub occurred_at: DateTime<Utc>,
    /// エラー発生時のリクエストパス
    pub endpoint: String,
}

/// 挿入前のエラーレコード
///
/// IDはストアが`append`時に採番するため持たない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewErrorRecord {
    /// 例外種別
    pub exception_type: String,
    /// 人間可読なエラーメッセージ
    pub message: String,
    /// 捕捉時点のバックトレース
    pub stacktrace: String,
    /// 捕捉時刻（UTC）
    pub occurred_at: DateTime<Utc>,
    /// エラー発生時のリクエストパス
    pub endpoint: String,
}

/// SQLiteエラーログストア
///
/// - 書き込み: 専用の単一接続（Arc<Mutex<Connection>>）
/// - 読み取り: deadpool-sqliteによるasync接続プール
pub struct ErrorLogStore {
    /// 書き込み専用接続（挿入は1文のため単一接続で十分）
    write_conn: Arc<Mutex<Connection>>,
    /// 読み取り用async接続プール
    read_pool: Pool,
}

/// SQLiteデータベースのスキーマを定義するSQL
///
/// `CREATE TABLE IF NOT EXISTS`のみで構成され、プロセス起動のたびに
/// 実行しても安全（冪等）。
const SCHEMA_SQL: &str = r#"
-- WALモード設定
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;

-- エラーログテーブル
CREATE TABLE IF NOT EXISTS error_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,  -- 採番ID（再利用しない）
    exception_type TEXT NOT NULL,          -- 例外種別
    message TEXT NOT NULL,                 -- エラーメッセージ
    stacktrace TEXT NOT NULL,              -- バックトレース全文
    occurred_at TEXT NOT NULL,             -- 捕捉時刻（RFC 3339、UTC）
    endpoint TEXT NOT NULL                 -- リクエストパス
);

-- 一覧取得（新しい順）用インデックス
CREATE INDEX IF NOT EXISTS idx_error_logs_occurred_at ON error_logs(occurred_at DESC);
"#;

/// タイムスタンプをDB保存用のテキストに変換する
///
/// マイクロ秒固定幅のRFC 3339（UTC、"Z"終端）。固定幅のため
/// テキストの辞書順ソートが時刻順と一致する。
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// DB保存用テキストからタイムスタンプを復元する
fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|dt| dt.with_timezone(&Utc))
}

impl ErrorLogStore {
    /// 新しいErrorLogStoreを作成
    ///
    /// データベースファイルを開き、スキーマを初期化する。
    /// WALモードを有効にし、書き込み用単一接続と読み取り用プールを構成する。
    /// 既存のデータベースに対して再実行しても安全（スキーマは冪等）。
    ///
    /// # Arguments
    /// * `db_path` - データベースファイルのパス
    ///
    /// # Returns
    /// * `Ok(ErrorLogStore)` - 成功時
    /// * `Err(StoreError)` - ストレージが書き込み不能な場合など
    pub async fn new(db_path: &str) -> Result<Self, StoreError> {
        // 書き込み用接続を作成し、スキーマを初期化
        let write_conn = Connection::open(db_path)?;
        write_conn.execute_batch(SCHEMA_SQL)?;

        // 読み取り用プールを作成（最大4接続）
        // builder()はInfallibleを返すためexpectで十分
        let cfg = Config::new(db_path);
        let read_pool = cfg
            .builder(Runtime::Tokio1)
            .expect("Config builder should not fail")
            .max_size(4)
            .build()?;

        Ok(Self {
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_pool,
        })
    }

    /// エラーレコードを追記し、採番されたIDを返す
    ///
    /// 書き込み専用接続を使用する。挿入はINSERT 1文のため原子的で、
    /// コミット前の行が読み取り側から見えることはない。
    /// 複数リクエストからの並行呼び出しは内部のMutexで直列化されるため、
    /// 呼び出し側のロックは不要。
    ///
    /// # Arguments
    /// * `record` - 挿入するエラーレコード（ID未採番）
    ///
    /// # Returns
    /// * `Ok(i64)` - 採番されたID
    /// * `Err(StoreError)` - エラー
    pub async fn append(&self, record: &NewErrorRecord) -> Result<i64, StoreError> {
        let record = record.clone();
        let conn = self.write_conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .expect("エラーログ追記時の書き込み接続ロック取得に失敗（Mutex poisoned）");

            conn.execute(
                "INSERT INTO error_logs (exception_type, message, stacktrace, occurred_at, endpoint)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    &record.exception_type,
                    &record.message,
                    &record.stacktrace,
                    format_timestamp(&record.occurred_at),
                    &record.endpoint,
                ],
            )?;

            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(|e| StoreError::Database(format!("タスク実行エラー: {}", e)))?
    }

    /// 全エラーレコードを新しい順に取得する
    ///
    /// 読み取りプールから接続を取得し、書き込み中でも並行実行可能。
    /// `occurred_at`降順、同時刻はID降順（呼び出し間でも安定した順序）。
    ///
    /// # Returns
    /// * `Ok(Vec<ErrorRecord>)` - 全レコード（新しい順）
    /// * `Err(StoreError)` - エラー
    pub async fn list_all(&self) -> Result<Vec<ErrorRecord>, StoreError> {
        let conn = self.read_pool.get().await?;

        conn.interact(|conn| Self::execute_list(conn)).await?
    }

    /// 一覧クエリを実行（内部用）
    fn execute_list(conn: &Connection) -> Result<Vec<ErrorRecord>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, exception_type, message, stacktrace, occurred_at, endpoint
             FROM error_logs
             ORDER BY occurred_at DESC, id DESC",
        )?;

        let records = stmt
            .query_map([], |row| {
                let occurred_at: String = row.get(4)?;
                let occurred_at = parse_timestamp(&occurred_at).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;

                Ok(ErrorRecord {
                    id: row.get(0)?,
                    exception_type: row.get(1)?,
                    message: row.get(2)?,
                    stacktrace: row.get(3)?,
                    occurred_at,
                    endpoint: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }
}
