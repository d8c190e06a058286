//! Single-slot model residency.
//!
//! Model weights are too large to keep both roles in memory, so the manager
//! holds at most one [`LanguageModel`] at a time. Asking for the resident
//! role reuses it; asking for the other role releases the current instance
//! before the new one is loaded. One async mutex serializes loads, releases,
//! reports and the completion calls themselves: a [`ModelLease`] is the
//! owned guard, so a caller holds the slot for exactly one call.

use cogloop_core::error::ProviderError;
use cogloop_core::provider::{
    Acceleration, Completion, CompletionRequest, LanguageModel, ModelLoader, ModelRole,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

/// The model currently occupying the slot.
struct LoadedModel {
    role: ModelRole,
    path: PathBuf,
    model: Box<dyn LanguageModel>,
    acceleration: u32,
}

#[derive(Default)]
struct SlotState {
    resident: Option<LoadedModel>,
    /// Level each role achieved on its most recent load
    levels: BTreeMap<ModelRole, u32>,
}

impl SlotState {
    /// Best-effort reset, then drop.
    fn release(&mut self) {
        let Some(mut loaded) = self.resident.take() else {
            return;
        };
        info!(role = %loaded.role, path = %loaded.path.display(), "Unloading model");
        if let Err(e) = loaded.model.reset() {
            warn!(role = %loaded.role, error = %e, "Model reset failed, dropping anyway");
        }
        drop(loaded);
    }

    /// Make `role` resident. Blocking: runs on a blocking worker.
    fn load(
        &mut self,
        loader: &dyn ModelLoader,
        role: ModelRole,
        acceleration: u32,
    ) -> Result<(), ProviderError> {
        if self.resident.as_ref().is_some_and(|m| m.role == role) {
            return Ok(());
        }

        self.release();

        let path = loader.locate(role)?;
        info!(role = %role, path = %path.display(), acceleration, "Loading model");

        let (model, achieved) = match loader.instantiate(role, &path, acceleration) {
            Ok(model) => (model, acceleration),
            Err(e) if acceleration > 0 => {
                warn!(
                    role = %role,
                    acceleration,
                    error = %e,
                    "Accelerated load failed, falling back to CPU"
                );
                (loader.instantiate(role, &path, 0)?, 0)
            }
            Err(e) => return Err(e),
        };

        self.levels.insert(role, achieved);
        self.resident = Some(LoadedModel {
            role,
            path,
            model,
            acceleration: achieved,
        });
        Ok(())
    }
}

/// Exclusive access to the resident model for one call.
///
/// Dropping the lease releases the slot lock; the model stays resident.
pub struct ModelLease {
    guard: OwnedMutexGuard<SlotState>,
}

impl ModelLease {
    /// Role of the leased model.
    pub fn role(&self) -> Option<ModelRole> {
        self.guard.resident.as_ref().map(|m| m.role)
    }

    /// Acceleration level the leased model was loaded at.
    pub fn acceleration(&self) -> Option<u32> {
        self.guard.resident.as_ref().map(|m| m.acceleration)
    }

    /// Run one blocking completion against the leased model.
    pub fn complete(&mut self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        match self.guard.resident.as_mut() {
            Some(loaded) => loaded.model.complete(request),
            None => Err(ProviderError::NotConfigured(
                "lease has no resident model".into(),
            )),
        }
    }
}

/// Owns the single model slot.
pub struct ModelSlotManager {
    loader: Arc<dyn ModelLoader>,
    acceleration_level: u32,
    state: Arc<Mutex<SlotState>>,
}

impl ModelSlotManager {
    /// `acceleration_level` is tried first on every load; 0 disables acceleration.
    pub fn new(loader: Arc<dyn ModelLoader>, acceleration_level: u32) -> Self {
        Self {
            loader,
            acceleration_level,
            state: Arc::new(Mutex::new(SlotState::default())),
        }
    }

    pub fn acceleration_level(&self) -> u32 {
        self.acceleration_level
    }

    /// Lease the model for `role`, swapping it in if another role is resident.
    ///
    /// Waits for the slot lock first, so concurrent callers asking for
    /// different roles block while a swap is in progress.
    pub async fn acquire(&self, role: ModelRole) -> Result<ModelLease, ProviderError> {
        let guard = self.state.clone().lock_owned().await;
        if guard.resident.as_ref().is_some_and(|m| m.role == role) {
            return Ok(ModelLease { guard });
        }

        let loader = self.loader.clone();
        let acceleration = self.acceleration_level;
        let guard = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            guard
                .load(loader.as_ref(), role, acceleration)
                .map(|()| guard)
        })
        .await
        .map_err(|e| ProviderError::Worker(format!("model load task failed: {e}")))??;

        Ok(ModelLease { guard })
    }

    /// Level each role last ran at, or `Unloaded` if it never loaded.
    pub async fn report(&self) -> BTreeMap<ModelRole, Acceleration> {
        let state = self.state.lock().await;
        ModelRole::ALL
            .into_iter()
            .map(|role| {
                let level = state
                    .levels
                    .get(&role)
                    .map_or(Acceleration::Unloaded, |l| Acceleration::Level(*l));
                (role, level)
            })
            .collect()
    }

    /// The role currently occupying the slot.
    pub async fn resident(&self) -> Option<ModelRole> {
        self.state.lock().await.resident.as_ref().map(|m| m.role)
    }

    /// Release the resident model, if any.
    pub async fn unload(&self) {
        let mut guard = self.state.clone().lock_owned().await;
        if guard.resident.is_none() {
            return;
        }
        // Dropping weights can take a while; keep it off the executor.
        if let Err(e) = tokio::task::spawn_blocking(move || guard.release()).await {
            warn!(error = %e, "Model unload task failed");
        }
    }
}
