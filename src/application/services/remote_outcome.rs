use crate::application::events::{StateEvent, ToastEvent};
use crate::domain::value_objects::OptimisticUpdateId;
use crate::infrastructure::sync::{CancelHandle, OptimisticUpdateLedger, StateSyncBroadcaster};
use crate::shared::error::AppError;
use tracing::{debug, warn};

/// 楽観的更新に対するリモート呼び出しの決着処理。
///
/// 成功なら confirm、失敗なら台帳ロールバック + トースト。
/// `idempotent_constraint` が立っている場合、一意制約違反は
/// 「リモートでは既にその状態」とみなして成功扱いにする。
/// 自動ロールバック後に届いた遅延応答は確定させず、次回リフレッシュに任せる。
pub(crate) async fn settle_remote(
    ledger: &OptimisticUpdateLedger,
    broadcaster: &StateSyncBroadcaster<StateEvent>,
    update_id: &OptimisticUpdateId,
    cancel: &CancelHandle,
    result: Result<(), AppError>,
    idempotent_constraint: bool,
    failure_toast: &str,
) -> Result<(), AppError> {
    let outcome = match result {
        Ok(()) => Ok(()),
        Err(AppError::Constraint(msg)) if idempotent_constraint => {
            debug!(error = %msg, "constraint violation treated as already applied");
            Ok(())
        }
        Err(err) => Err(err),
    };

    match outcome {
        Ok(()) => {
            if cancel.is_cancelled() {
                warn!(
                    update_id = %update_id,
                    "remote call settled after auto-rollback, leaving state to next refresh"
                );
                return Err(AppError::Cancelled(
                    "remote call settled after auto-rollback".to_string(),
                ));
            }
            ledger.confirm(update_id).await;
            Ok(())
        }
        Err(err) => {
            if !ledger.rollback(update_id).await {
                debug!(update_id = %update_id, "rollback raced with timeout, nothing left to undo");
            }
            broadcaster.notify(
                StateEvent::TOAST_KEY,
                StateEvent::Toast(ToastEvent::error(failure_toast)),
            );
            Err(err)
        }
    }
}
