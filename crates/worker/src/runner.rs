//! The one-task-at-a-time worker loop.

use crate::queue::{CompletionSink, QueueError, TaskSource};
use crate::task::TaskContext;
use seqvault_db::{ErrorScope, Status};

/// Pull tasks until the source is exhausted, processing each fully before
/// accepting the next.
///
/// A successful task emits exactly one completion message. A failed task is
/// consumed after its cause is persisted as an error record and the file is
/// moved to `Error`; nothing is requeued.
pub async fn run<S, P>(
    ctx: &TaskContext,
    source: &mut S,
    sink: &mut P,
) -> Result<(), QueueError>
where
    S: TaskSource,
    P: CompletionSink,
{
    while let Some(task) = source.next_task().await? {
        let file_id = task.file_id;
        tracing::info!(file_id, filename = %task.filename, "task accepted");

        match ctx.process(&task).await {
            Ok(completion) => {
                sink.publish(&completion).await?;
                tracing::info!(
                    file_id,
                    target_name = %completion.target_name,
                    "task archived"
                );
            }
            Err(failure) => {
                tracing::error!(
                    file_id = failure.file_id,
                    error = %failure.cause,
                    "task failed"
                );
                let message = failure.cause.to_string();
                if let Err(e) = ctx
                    .store
                    .register_error(ErrorScope::File(failure.file_id), &message)
                    .await
                {
                    tracing::error!(file_id, error = %e, "could not record task error");
                }
                if let Err(e) = ctx.store.update_status(failure.file_id, Status::Error).await {
                    tracing::error!(file_id, error = %e, "could not mark file as errored");
                }
            }
        }
    }

    tracing::info!("task source drained, worker stopping");
    Ok(())
}
