use crate::error::StoreError;
use crate::schedule::types::Task;
use crate::storage::task::entity::Model as TaskModel;

impl TryFrom<TaskModel> for Task {
    type Error = StoreError;

    fn try_from(model: TaskModel) -> Result<Self, Self::Error> {
        let status = model.status.parse().map_err(StoreError::Corrupt)?;
        let error_kind = model
            .error_kind
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(StoreError::Corrupt)?;

        Ok(Task {
            id: model.id,
            url: model.url,
            status,
            created_at: model.created_at,
            started_at: model.started_at,
            completed_at: model.completed_at,
            claimed_by: model.claimed_by,
            title: model.title,
            description: model.description,
            audio_path: model.audio_path,
            subtitle_path: model.subtitle_path,
            artifact_bytes: u64::try_from(model.artifact_bytes).unwrap_or(0),
            evicted_at: model.evicted_at,
            error_message: model.error_message,
            error_kind,
        })
    }
}
