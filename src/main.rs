//! 実行時エラーを捕捉・記録するHTTPデモAPIサーバー
//!
//! 本バイナリは以下の機能を提供する:
//! - 実行時エラーを意図的に発生させるデモルート
//!   (/null_reference, /index_out_of_range, /invalid_operation,
//!    /type_error, /value_error)
//! - 捕捉したエラーのSQLiteへの記録と統一JSONエンベロープでの返却
//! - 記録後の外部コレクターへのベストエフォート通知
//! - エラーログの一覧取得 (GET /logs)

mod capture;
mod error;
mod fault;
mod notifier;
mod routes;
mod store;

pub use capture::capture_middleware;
pub use error::ApiError;
pub use fault::{Fault, FaultEnvelope, FaultKind};
pub use notifier::Notifier;
pub use store::{ErrorLogStore, ErrorRecord, NewErrorRecord, StoreError};

use axum::{middleware, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// データベースパス環境変数名
const DB_PATH_ENV: &str = "DB_PATH";

/// デフォルトのデータベースパス
const DEFAULT_DB_PATH: &str = "errors_sqlite.db";

/// コレクターURL環境変数名
const COLLECTOR_URL_ENV: &str = "COLLECTOR_URL";

/// デフォルトのコレクターURL
const DEFAULT_COLLECTOR_URL: &str = "http://127.0.0.1:9090/collect";

/// アプリケーション状態
///
/// ルーター全体で共有される状態を保持する。
#[derive(Clone)]
pub struct AppState {
    /// SQLiteエラーログストア
    pub store: Arc<ErrorLogStore>,
    /// コレクター通知クライアント
    pub notifier: Notifier,
}

/// ルーターを構築する
///
/// 全エンドポイントのルーティングを定義し、エラー捕捉ミドルウェアを
/// 一度だけ適用する。エラーを発生させるデモルートはGET/POSTの両方を
/// 受け付ける。TraceLayerによりリクエスト/レスポンスの構造化ログを
/// 自動記録する。
///
/// # Arguments
/// * `state` - アプリケーション状態（ストアと通知クライアント）
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/logs", get(routes::list_logs))
        .route(
            "/null_reference",
            get(routes::null_reference).post(routes::null_reference),
        )
        .route(
            "/index_out_of_range",
            get(routes::index_out_of_range).post(routes::index_out_of_range),
        )
        .route(
            "/invalid_operation",
            get(routes::invalid_operation).post(routes::invalid_operation),
        )
        .route(
            "/type_error",
            get(routes::type_error).post(routes::type_error),
        )
        .route(
            "/value_error",
            get(routes::value_error).post(routes::value_error),
        )
        .route("/test", get(routes::test))
        .route("/test_error", get(routes::test_error))
        .route("/static_error", get(routes::static_error))
        .route("/static_type_error", get(routes::static_type_error))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            capture_middleware,
        ))
        // リクエストトレーシングレイヤー（method, path, status, latencyを自動記録）
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// シャットダウンシグナルを待機する
///
/// SIGTERMまたはCtrl+C (SIGINT) を待機し、いずれかを受信したらリターンする。
/// axum::serve の with_graceful_shutdown() と組み合わせて使用することで、
/// 新規リクエストの受付停止と処理中リクエストの完了待機を実現する。
///
/// # Panics
/// シグナルハンドラーの登録に失敗した場合はパニックする。
async fn shutdown_signal() {
    // Ctrl+C (SIGINT) を待機
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Ctrl+C シグナルハンドラーの登録に失敗しました");
    };

    // SIGTERM を待機 (Unix系OSのみ)
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM シグナルハンドラーの登録に失敗しました")
            .recv()
            .await;
    };

    // Windows等の非Unix環境ではSIGTERMは利用不可
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C (SIGINT) を受信しました。graceful shutdownを開始します");
        }
        _ = terminate => {
            tracing::info!("SIGTERM を受信しました。graceful shutdownを開始します");
        }
    }
}

/// メイン関数
///
/// トレーシングを初期化し、HTTPサーバーを起動する。
/// SIGTERMまたはCtrl+Cを受信するとgraceful shutdownを実行し、
/// 処理中のリクエスト完了を待ってからSQLiteコネクションを正常にクローズする。
/// 送信中のコレクター通知はプロセス終了とともに失われる（配送保証なし）。
///
/// # 環境変数
/// - `DB_PATH`: データベースファイルのパス（デフォルト: errors_sqlite.db）
/// - `COLLECTOR_URL`: コレクターURL（デフォルト: http://127.0.0.1:9090/collect）
/// - `RUST_LOG`: ログレベル（デフォルト: info）
#[tokio::main]
async fn main() {
    // 構造化ログの初期化
    // RUST_LOG環境変数でログレベルを制御（デフォルト: info）
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("エラーログAPIサーバーを起動します");

    // データベースパスを環境変数から取得
    let db_path = std::env::var(DB_PATH_ENV).unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    tracing::info!("データベースパス: {}", db_path);

    // コレクターURLを環境変数から取得
    let collector_url =
        std::env::var(COLLECTOR_URL_ENV).unwrap_or_else(|_| DEFAULT_COLLECTOR_URL.to_string());
    tracing::info!("コレクターURL: {}", collector_url);

    // SQLiteエラーログストアを初期化
    let store = Arc::new(
        ErrorLogStore::new(&db_path)
            .await
            .expect("SQLiteストアの初期化に失敗しました"),
    );
    tracing::info!("SQLiteストアを初期化しました");

    let state = AppState {
        store,
        notifier: Notifier::new(collector_url),
    };
    let app = create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], 8080));
    tracing::info!("リッスン開始: {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("アドレスのバインドに失敗しました");

    // graceful shutdownを有効にしてサーバーを起動
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("サーバーの起動に失敗しました");

    tracing::info!("サーバーが正常に停止しました");
}
