//! コレクター通知クライアント
//!
//! エラーログ保存後に、採番されたIDを外部コレクターへベストエフォートで
//! 通知する。通知はリクエスト処理から切り離されたタスクとして実行され、
//! 失敗（接続エラー、タイムアウト、エラーレスポンス）はログに記録する
//! のみで、再試行もクライアントへの伝播も行わない。

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 通知に含めるプロジェクト識別子（固定）
const PROJECT_ID: u64 = 1;

/// リクエストタイムアウト（秒）
///
/// 通知は応答に影響しないが、滞留した接続でリソースが
/// 増え続けないよう短めに制限する。
const REQUEST_TIMEOUT_SECS: u64 = 5;

/// 接続タイムアウト（秒）
const CONNECT_TIMEOUT_SECS: u64 = 2;

/// 同時実行可能な通知数の上限
///
/// エラーが集中発生した場合でも送信タスクが無制限に増えないよう、
/// 上限を超えた通知は破棄する（配送保証はもともと存在しない）。
const MAX_INFLIGHT_NOTIFICATIONS: usize = 8;

/// コレクターへ送信する通知ペイロード
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorNotification {
    /// プロジェクト識別子
    pub project_id: u64,
    /// ストアが採番したエラーログID
    pub error_id: i64,
}

/// コレクター通知クライアント
///
/// タイムアウト付きHTTPクライアントとコレクターURL、同時実行数を
/// 制限するセマフォを保持する。Cloneは内部リソースを共有する。
#[derive(Clone)]
pub struct Notifier {
    /// HTTPクライアント（タイムアウト付き）
    client: Client,
    /// コレクターエンドポイントURL
    collector_url: String,
    /// 同時実行数リミッター
    limiter: Arc<Semaphore>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("collector_url", &self.collector_url)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    /// コレクターURLからNotifierを作成
    ///
    /// # Arguments
    /// * `collector_url` - 通知先エンドポイントの完全なURL
    pub fn new(collector_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .expect("HTTPクライアントの構築に失敗");

        Self {
            client,
            collector_url: collector_url.into(),
            limiter: Arc::new(Semaphore::new(MAX_INFLIGHT_NOTIFICATIONS)),
        }
    }

    /// エラーログIDをコレクターへ非同期に通知する
    ///
    /// 送信タスクを切り離して起動し、即座にリターンする。呼び出し側は
    /// 完了を待たず、結果を観測しない（戻り値のJoinHandleはテスト用）。
    /// 同時実行数が上限に達している場合、この通知は送信せずに破棄する。
    ///
    /// # Arguments
    /// * `error_id` - ストアが採番したエラーログID
    pub fn notify_detached(&self, error_id: i64) -> JoinHandle<()> {
        let permit = match self.limiter.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(error_id, "通知の同時実行数が上限に達したため破棄");
                return tokio::spawn(async {});
            }
        };

        let client = self.client.clone();
        let url = self.collector_url.clone();

        tokio::spawn(async move {
            // タスク終了までpermitを保持する
            let _permit = permit;
            let payload = ErrorNotification {
                project_id: PROJECT_ID,
                error_id,
            };

            match client.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(error_id, "コレクターへ通知を送信");
                }
                Ok(response) => {
                    warn!(
                        error_id,
                        status = %response.status(),
                        "コレクターがエラーを返却（通知は破棄）"
                    );
                }
                Err(e) => {
                    warn!(
                        error_id,
                        error = %e,
                        "コレクターへの通知に失敗（通知は破棄）"
                    );
                }
            }
        })
    }
}
