//! 実行時エラーの分類と統一エラーレスポンス
//!
//! デモルートで発生する実行時エラーを閉じた列挙型で分類する。
//! 各カテゴリは固定のワイヤ名（例外種別名）にマッピングされ、
//! すべての捕捉エラーは`{error, message, endpoint, occurred_at}`の
//! 統一エンベロープ（ステータス500固定）で返却される。

use std::backtrace::Backtrace;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 実行時エラーのカテゴリ
///
/// 捕捉対象のエラーはこの5種に限定される。ルーティング上の404/405は
/// ここには含まれず、捕捉対象外として素通しされる。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// 存在しない値のフィールド参照
    NullReference,
    /// 範囲外インデックスアクセス
    IndexOutOfRange,
    /// 0による除算
    DivisionByZero,
    /// 型の不一致
    TypeMismatch,
    /// 変換失敗
    InvalidConversion,
}

impl FaultKind {
    /// ワイヤ上の例外種別名を返す
    ///
    /// `error`フィールドおよび`exception_type`カラムに使用する固定名。
    pub fn exception_name(&self) -> &'static str {
        match self {
            FaultKind::NullReference => "AttributeError",
            FaultKind::IndexOutOfRange => "IndexError",
            FaultKind::DivisionByZero => "ZeroDivisionError",
            FaultKind::TypeMismatch => "TypeError",
            FaultKind::InvalidConversion => "ValueError",
        }
    }
}

/// 捕捉対象の実行時エラー
///
/// ハンドラーは`Result<T, Fault>`を返し、`?`でエラーを伝播させる。
/// バックトレースは構築時点で捕捉し、テキストとして保持する
/// （レスポンス拡張に載せるためClone可能にしている）。
#[derive(Debug, Clone)]
pub struct Fault {
    kind: FaultKind,
    message: String,
    trace: String,
}

impl Fault {
    /// 新しいFaultを作成し、この時点のバックトレースを捕捉する
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: Backtrace::force_capture().to_string(),
        }
    }

    /// 存在しない値への参照エラーを作成
    pub fn null_reference(message: impl Into<String>) -> Self {
        Self::new(FaultKind::NullReference, message)
    }

    /// 範囲外アクセスエラーを作成
    pub fn index_out_of_range(message: impl Into<String>) -> Self {
        Self::new(FaultKind::IndexOutOfRange, message)
    }

    /// 0除算エラーを作成
    pub fn division_by_zero(message: impl Into<String>) -> Self {
        Self::new(FaultKind::DivisionByZero, message)
    }

    /// 型不一致エラーを作成
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(FaultKind::TypeMismatch, message)
    }

    /// 変換失敗エラーを作成
    pub fn invalid_conversion(message: impl Into<String>) -> Self {
        Self::new(FaultKind::InvalidConversion, message)
    }

    /// エラーカテゴリを取得
    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// ワイヤ上の例外種別名を取得
    pub fn exception_name(&self) -> &'static str {
        self.kind.exception_name()
    }

    /// エラーメッセージを取得
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 捕捉済みバックトレースを取得
    pub fn trace(&self) -> &str {
        &self.trace
    }
}

impl IntoResponse for Fault {
    /// Faultをレスポンスに変換する
    ///
    /// エンベロープ形式のボディを持つ500レスポンスを生成し、自身を
    /// レスポンス拡張に格納する。捕捉ミドルウェアが拡張からFaultを
    /// 取り出してログ保存し、endpoint・捕捉時刻を埋めた最終レスポンス
    /// に差し替える（このボディのendpointは空のプレースホルダー）。
    fn into_response(self) -> Response {
        let envelope =
            FaultEnvelope::new(self.exception_name(), self.message.clone(), "", Utc::now());
        let mut response = envelope.into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// 統一エラーエンベロープ
///
/// 捕捉エラー・固定JSONデモルートの双方が返す共通のレスポンス形式。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaultEnvelope {
    /// 例外種別名（例: "ZeroDivisionError"）
    pub error: String,
    /// 人間可読なエラーメッセージ
    pub message: String,
    /// エラー発生時のリクエストパス
    pub endpoint: String,
    /// 捕捉時刻（UTC、ISO 8601）
    pub occurred_at: DateTime<Utc>,
}

impl FaultEnvelope {
    /// 新しいFaultEnvelopeを作成
    pub fn new(
        error: impl Into<String>,
        message: impl Into<String>,
        endpoint: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            endpoint: endpoint.into(),
            occurred_at,
        }
    }

    /// 現在時刻でFaultEnvelopeを作成（固定JSONルート用）
    pub fn now(
        error: impl Into<String>,
        message: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::new(error, message, endpoint, Utc::now())
    }
}

impl IntoResponse for FaultEnvelope {
    /// ステータスコードはエラーカテゴリによらず500固定
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}
