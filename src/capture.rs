//! エラー捕捉ミドルウェア
//!
//! 全ルートの未処理実行時エラーが通過する単一の捕捉点。
//! - ハンドラーが返したFaultをレスポンス拡張から回収
//! - エラーレコードを構築してストアへ保存
//! - 保存成功時はコレクター通知を切り離して起動
//! - 統一エンベロープ（500）をクライアントへ返却
//!
//! ルーティング上の404/405などプロトコルレベルの結果は捕捉対象外で、
//! 記録されずにそのまま通過する。

use crate::error::ApiError;
use crate::fault::{Fault, FaultEnvelope};
use crate::store::NewErrorRecord;
use crate::AppState;
use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

/// エラー捕捉ミドルウェア
///
/// サービス起動時に一度だけルーターへ登録され、ストアと通知クライアント
/// への参照をStateとして注入される。リクエストごとの状態は持たない。
///
/// # Returns
/// - 捕捉対象エラーなし: 内側のレスポンスをそのまま返す
/// - 捕捉対象エラーあり: ログ保存後、統一エンベロープ（500）を返す
/// - ログ保存失敗: 汎用の500エラー（JSON形式）を返す
pub async fn capture_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let endpoint = request.uri().path().to_string();
    let mut response = next.run(request).await;

    // Fault拡張がなければ捕捉対象外（404/405や正常応答）
    let Some(fault) = response.extensions_mut().remove::<Fault>() else {
        return response;
    };

    // 捕捉時刻はリクエスト開始時刻ではなくこの時点
    let occurred_at = Utc::now();

    tracing::error!(
        endpoint = %endpoint,
        exception_type = fault.exception_name(),
        message = %fault.message(),
        "ハンドラーの実行時エラーを捕捉"
    );

    let record = NewErrorRecord {
        exception_type: fault.exception_name().to_string(),
        message: fault.message().to_string(),
        stacktrace: fault.trace().to_string(),
        occurred_at,
        endpoint: endpoint.clone(),
    };

    match state.store.append(&record).await {
        Ok(error_id) => {
            tracing::info!(error_id, endpoint = %endpoint, "エラーログを保存");
            // 通知は切り離して起動し、完了を待たない
            state.notifier.notify_detached(error_id);

            FaultEnvelope::new(fault.exception_name(), fault.message(), endpoint, occurred_at)
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, endpoint = %endpoint, "エラーログの保存に失敗");
            ApiError::internal_error(format!("エラーログを保存できませんでした: {}", e))
                .into_response()
        }
    }
}
