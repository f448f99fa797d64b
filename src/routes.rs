//! デモルートとログ一覧エンドポイント
//!
//! 本サービスのルートは3系統に分かれる:
//! - 実際に実行時エラーを発生させ、捕捉ミドルウェアを通るデモルート
//! - エンベロープと同形の固定JSONを返すだけのデモルート（記録されない）
//! - 保存済みエラーログを新しい順に返す `GET /logs`

use crate::error::ApiError;
use crate::fault::{Fault, FaultEnvelope};
use crate::AppState;
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

/// 範囲外アクセスデモで参照する固定配列
const SAMPLE_VALUES: [i64; 3] = [1, 2, 3];

/// 範囲外アクセスデモのデフォルトインデックス
const DEFAULT_INDEX: usize = 5;

/// 除算デモのデフォルト被除数
const DEFAULT_DIVIDEND: i64 = 10;

/// 除算デモのデフォルト除数（0除算を起こす）
const DEFAULT_DIVISOR: i64 = 0;

/// セッション情報（null_referenceデモ用）
struct Session {
    display_name: String,
}

/// 現在のセッションを取得する（常に未設定）
fn current_session() -> Option<Session> {
    None
}

/// GET/POST /null_reference
///
/// 存在しないセッションのフィールドを参照し、AttributeError相当の
/// 実行時エラーを発生させる。
pub async fn null_reference() -> Result<String, Fault> {
    let session = current_session().ok_or_else(|| {
        Fault::null_reference("セッションが存在しないためdisplay_nameを参照できません")
    })?;
    Ok(session.display_name)
}

/// 範囲外アクセスデモのクエリパラメータ
#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    /// 参照するインデックス（省略時は範囲外の5）
    pub index: Option<usize>,
}

/// GET/POST /index_out_of_range
///
/// 3要素の固定配列に対してインデックスアクセスを行う。範囲外なら
/// IndexError相当の実行時エラー、範囲内なら要素をテキストで返す。
pub async fn index_out_of_range(Query(query): Query<IndexQuery>) -> Result<String, Fault> {
    let index = query.index.unwrap_or(DEFAULT_INDEX);
    let value = SAMPLE_VALUES.get(index).ok_or_else(|| {
        Fault::index_out_of_range(format!(
            "インデックス{}は範囲外です（要素数{}）",
            index,
            SAMPLE_VALUES.len()
        ))
    })?;
    Ok(value.to_string())
}

/// 除算デモのクエリパラメータ
#[derive(Debug, Deserialize)]
pub struct DivisionQuery {
    /// 被除数（省略時は10）
    pub dividend: Option<i64>,
    /// 除数（省略時は0、0除算を起こす）
    pub divisor: Option<i64>,
}

/// GET/POST /invalid_operation
///
/// 整数除算を行う。除数が0ならZeroDivisionError相当の実行時エラー、
/// 有効なら商をテキストで返す。
pub async fn invalid_operation(Query(query): Query<DivisionQuery>) -> Result<String, Fault> {
    let dividend = query.dividend.unwrap_or(DEFAULT_DIVIDEND);
    let divisor = query.divisor.unwrap_or(DEFAULT_DIVISOR);

    // checked_divは0除算（およびMIN/-1のオーバーフロー）でNone
    let quotient = dividend.checked_div(divisor).ok_or_else(|| {
        Fault::division_by_zero(format!("0による除算: {} / {}", dividend, divisor))
    })?;
    Ok(quotient.to_string())
}

/// GET/POST /value_error
///
/// 数値でない文字列を整数へ変換し、ValueError相当の実行時エラーを
/// 発生させる。
pub async fn value_error() -> Result<String, Fault> {
    let raw = "not_a_number";
    let value: i64 = raw
        .parse()
        .map_err(|_| Fault::invalid_conversion(format!("\"{}\"を整数に変換できません", raw)))?;
    Ok(value.to_string())
}

/// GET/POST /type_error
///
/// 動的型の値同士の加算を試みる。事前検証で変換不能と判明した場合は
/// 制御されたValueErrorエンベロープ（500）を直接返す。実行時エラーは
/// 発生させないため、捕捉もログ記録もされない。
pub async fn type_error() -> Response {
    let num1 = Value::from(5);
    let num2 = Value::from("hello");

    match add_dynamic(&num1, &num2) {
        Ok(sum) => sum.into_response(),
        Err(envelope) => envelope.into_response(),
    }
}

/// 動的型の加算（type_errorデモ用）
///
/// 両方整数なら加算、両方文字列なら連結。それ以外は双方の整数への
/// 変換を試み、変換できなければ制御されたValueErrorエンベロープを返す。
fn add_dynamic(num1: &Value, num2: &Value) -> Result<String, FaultEnvelope> {
    if let (Some(a), Some(b)) = (num1.as_i64(), num2.as_i64()) {
        return Ok((a + b).to_string());
    }
    if let (Some(a), Some(b)) = (num1.as_str(), num2.as_str()) {
        return Ok(format!("{}{}", a, b));
    }
    match (coerce_i64(num1), coerce_i64(num2)) {
        (Some(a), Some(b)) => Ok((a + b).to_string()),
        _ => Err(FaultEnvelope::now(
            "ValueError",
            "num1またはnum2を整数に変換できません",
            "/type_error",
        )),
    }
}

/// 動的型の値を整数へ変換する（数値または数値文字列を受け付ける）
fn coerce_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// GET /test
///
/// 動作確認用。常に成功する。
pub async fn test() -> &'static str {
    "Test success"
}

/// GET /test_error
///
/// 捕捉エラーと同形の固定JSONを返すのみで、実行時エラーは発生させず
/// ストアへの副作用もない。
pub async fn test_error() -> FaultEnvelope {
    FaultEnvelope::now(
        "TypeError",
        "intとstrを加算することはできません",
        "/test_error",
    )
}

/// GET /static_error
pub async fn static_error() -> FaultEnvelope {
    FaultEnvelope::now(
        "TypeError",
        "intとstrを加算することはできません",
        "/static_error",
    )
}

/// GET /static_type_error
pub async fn static_type_error() -> FaultEnvelope {
    FaultEnvelope::now(
        "TypeError",
        "intとstrを加算することはできません",
        "/static_type_error",
    )
}

/// GET /logs
///
/// 保存済みエラーログの全件を新しい順のJSON配列で返す。
///
/// # Returns
/// - 200 OK: エラーログの配列（各行の全フィールドを含む）
/// - 500 Internal Server Error: データベースエラー
pub async fn list_logs(State(state): State<AppState>) -> Response {
    match state.store.list_all().await {
        Ok(records) => {
            tracing::debug!(count = records.len(), "エラーログ一覧を返却");
            Json(records).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "エラーログ一覧の取得に失敗");
            ApiError::internal_error(format!("データベースエラー: {}", e)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;

    // ========================================
    // null_referenceのテスト
    // ========================================

    /// null_referenceが常にNullReferenceのFaultを返すことを確認
    #[tokio::test]
    async fn test_null_reference_faults() {
        let result = null_reference().await;

        let fault = result.expect_err("null_referenceが成功してしまった");
        assert_eq!(fault.kind(), FaultKind::NullReference);
        assert_eq!(fault.exception_name(), "AttributeError");
    }

    // ========================================
    // index_out_of_rangeのテスト
    // ========================================

    /// デフォルト（インデックス5）で範囲外エラーになることを確認
    #[tokio::test]
    async fn test_index_out_of_range_default_faults() {
        let result = index_out_of_range(Query(IndexQuery { index: None })).await;

        let fault = result.expect_err("デフォルトインデックスで成功してしまった");
        assert_eq!(fault.kind(), FaultKind::IndexOutOfRange);
        assert!(
            fault.message().contains('5'),
            "メッセージにインデックスが含まれない: {}",
            fault.message()
        );
    }

    /// インデックス10（要素数3）で範囲外エラーになることを確認
    #[tokio::test]
    async fn test_index_10_against_3_elements_faults() {
        let result = index_out_of_range(Query(IndexQuery { index: Some(10) })).await;

        let fault = result.expect_err("インデックス10で成功してしまった");
        assert_eq!(fault.exception_name(), "IndexError");
        assert!(fault.message().contains("10"));
        assert!(fault.message().contains('3'));
    }

    /// 範囲内のインデックスでは要素が返ることを確認
    #[tokio::test]
    async fn test_index_in_range_returns_element() {
        let result = index_out_of_range(Query(IndexQuery { index: Some(1) })).await;

        assert_eq!(result.unwrap(), "2");
    }

    // ========================================
    // invalid_operationのテスト
    // ========================================

    /// デフォルト（10 / 0）で0除算エラーになることを確認
    #[tokio::test]
    async fn test_invalid_operation_default_faults() {
        let result = invalid_operation(Query(DivisionQuery {
            dividend: None,
            divisor: None,
        }))
        .await;

        let fault = result.expect_err("0除算で成功してしまった");
        assert_eq!(fault.kind(), FaultKind::DivisionByZero);
        assert_eq!(fault.exception_name(), "ZeroDivisionError");
    }

    /// 有効な除数では商が返ることを確認
    #[tokio::test]
    async fn test_invalid_operation_with_valid_divisor() {
        let result = invalid_operation(Query(DivisionQuery {
            dividend: None,
            divisor: Some(2),
        }))
        .await;

        assert_eq!(result.unwrap(), "5");
    }

    // ========================================
    // value_errorのテスト
    // ========================================

    /// value_errorが常にInvalidConversionのFaultを返すことを確認
    #[tokio::test]
    async fn test_value_error_faults() {
        let result = value_error().await;

        let fault = result.expect_err("value_errorが成功してしまった");
        assert_eq!(fault.kind(), FaultKind::InvalidConversion);
        assert!(
            fault.message().contains("not_a_number"),
            "メッセージに変換元が含まれない: {}",
            fault.message()
        );
    }

    // ========================================
    // type_error（動的型加算）のテスト
    // ========================================

    /// 整数同士は加算されることを確認
    #[test]
    fn test_add_dynamic_both_integers() {
        let result = add_dynamic(&Value::from(5), &Value::from(3));
        assert_eq!(result.unwrap(), "8");
    }

    /// 文字列同士は連結されることを確認
    #[test]
    fn test_add_dynamic_both_strings() {
        let result = add_dynamic(&Value::from("foo"), &Value::from("bar"));
        assert_eq!(result.unwrap(), "foobar");
    }

    /// 数値文字列は整数へ変換して加算されることを確認
    #[test]
    fn test_add_dynamic_numeric_string_is_coerced() {
        let result = add_dynamic(&Value::from(5), &Value::from("7"));
        assert_eq!(result.unwrap(), "12");
    }

    /// 変換不能な組み合わせは制御されたValueErrorになることを確認
    #[test]
    fn test_add_dynamic_unconvertible_returns_value_error() {
        let result = add_dynamic(&Value::from(5), &Value::from("hello"));

        let envelope = result.expect_err("変換不能な組み合わせで成功してしまった");
        assert_eq!(envelope.error, "ValueError");
        assert_eq!(envelope.endpoint, "/type_error");
    }

    /// coerce_i64の変換規則を確認
    #[test]
    fn test_coerce_i64() {
        assert_eq!(coerce_i64(&Value::from(5)), Some(5));
        assert_eq!(coerce_i64(&Value::from("12")), Some(12));
        assert_eq!(coerce_i64(&Value::from("hello")), None);
        assert_eq!(coerce_i64(&Value::from(true)), None);
    }

    // ========================================
    // 固定JSONルートのテスト
    // ========================================

    /// testルートが固定テキストを返すことを確認
    #[tokio::test]
    async fn test_test_returns_plain_text() {
        assert_eq!(test().await, "Test success");
    }

    /// 固定JSONルートがそれぞれ自身のendpointを持つエンベロープを返すことを確認
    #[tokio::test]
    async fn test_canned_routes_carry_own_endpoint() {
        let envelope = test_error().await;
        assert_eq!(envelope.error, "TypeError");
        assert_eq!(envelope.endpoint, "/test_error");

        let envelope = static_error().await;
        assert_eq!(envelope.endpoint, "/static_error");

        let envelope = static_type_error().await;
        assert_eq!(envelope.endpoint, "/static_type_error");
    }
}
