//! Transparent-mode state machine (Visible / Hidden)
//!
//! The `enabled` flag is read lock-free on the syscall hot path; every
//! registry access happens behind `registry`. Enable and disable are
//! serialized by `mode` so the broadcast and the registry lifetime always
//! agree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::broadcast::{BroadcastOperation, CoreBroadcaster};
use super::cpuid::{self, CpuidRegisters};
use super::registry::{
    RegistryError, TrapKey, TrapParams, TrapRegistry,
    MAXIMUM_NUMBER_OF_THREAD_INFORMATION_FOR_TRANSPARENT_MODE_TRAPS,
};
use super::{GuestContext, TransparencyError, X86_FLAGS_TF};
use crate::protocol::KernelStatus;

/// Invoked after a tracked thread came back from its system call
///
/// Runs on the trapping core, after the registry lock was released.
pub trait SyscallReturnHandler: Send + Sync {
    fn on_syscall_return(
        &self,
        guest: &dyn GuestContext,
        process_id: u32,
        thread_id: u32,
        context: u64,
        params: &TrapParams,
    );
}

/// Default handler: one info line per consumed trap
#[derive(Debug, Default)]
pub struct LoggingSyscallHandler;

impl SyscallReturnHandler for LoggingSyscallHandler {
    fn on_syscall_return(
        &self,
        guest: &dyn GuestContext,
        process_id: u32,
        thread_id: u32,
        context: u64,
        params: &TrapParams,
    ) {
        let [p1, p2, p3, p4] = params.optional;
        log::info!(
            "Transparent callback handle the trap flag for process: {:x}, thread: {:x}, rip: {:x}, context: {:x} (p1: {:x}, p2: {:x}, p3: {:x}, p4: {:x})",
            process_id,
            thread_id,
            guest.last_exit_rip(),
            context,
            p1,
            p2,
            p3,
            p4
        );
    }
}

pub struct TransparencyCoordinator {
    enabled: AtomicBool,
    mode: Mutex<()>,
    registry: Mutex<Option<TrapRegistry>>,
    capacity: usize,
    broadcaster: Arc<dyn CoreBroadcaster>,
    handler: Box<dyn SyscallReturnHandler>,
}

impl TransparencyCoordinator {
    pub fn new(broadcaster: Arc<dyn CoreBroadcaster>) -> Self {
        Self::with_capacity(
            broadcaster,
            MAXIMUM_NUMBER_OF_THREAD_INFORMATION_FOR_TRANSPARENT_MODE_TRAPS,
        )
    }

    pub fn with_capacity(broadcaster: Arc<dyn CoreBroadcaster>, capacity: usize) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            mode: Mutex::new(()),
            registry: Mutex::new(None),
            capacity,
            broadcaster,
            handler: Box::new(LoggingSyscallHandler),
        }
    }

    /// Replace the callback run after a consumed trap
    pub fn with_handler(mut self, handler: Box<dyn SyscallReturnHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Slots the registry gets on every enable
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock_registry(&self) -> MutexGuard<'_, Option<TrapRegistry>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Visible -> Hidden
    pub fn enable(&self) -> Result<(), TransparencyError> {
        let _mode = self.mode.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_enabled() {
            return Err(TransparencyError::AlreadyHidden);
        }

        *self.lock_registry() = Some(TrapRegistry::with_capacity(self.capacity));

        if let Err(e) = self
            .broadcaster
            .apply(BroadcastOperation::EnableDbAndBpExiting)
        {
            log::error!("Unable to enable transparent-mode: {}", e);
            // cores that did switch must not stay intercepting
            if let Err(rollback) = self
                .broadcaster
                .apply(BroadcastOperation::DisableDbAndBpExiting)
            {
                log::error!(
                    "Unable to roll back transparent-mode interception: {}",
                    rollback
                );
            }
            *self.lock_registry() = None;
            return Err(e.into());
        }

        self.enabled.store(true, Ordering::SeqCst);
        log::info!("Transparent-mode enabled");
        Ok(())
    }

    /// Hidden -> Visible
    pub fn disable(&self) -> Result<(), TransparencyError> {
        let _mode = self.mode.lock().unwrap_or_else(|e| e.into_inner());
        if !self.is_enabled() {
            return Err(TransparencyError::AlreadyVisible);
        }

        self.enabled.store(false, Ordering::SeqCst);

        // the registry must outlive the broadcast, late traps still look it up
        let result = self
            .broadcaster
            .apply(BroadcastOperation::DisableDbAndBpExiting);

        *self.lock_registry() = None;

        match result {
            Ok(()) => {
                log::info!("Transparent-mode disabled");
                Ok(())
            }
            Err(e) => {
                log::error!("Transparent-mode disabled with a failed broadcast: {}", e);
                Err(e.into())
            }
        }
    }

    /// Hide or unhide request coming from the debugger, answered with a status
    pub fn handle_mode_request(&self, hide: bool) -> KernelStatus {
        let result = if hide { self.enable() } else { self.disable() };
        match result {
            Ok(()) => KernelStatus::SUCCESS,
            Err(e) => e.status(),
        }
    }

    /// Track (pid, tid) and make its syscall return trap
    ///
    /// Returns `false` when the mode is off or the registry is full; the
    /// syscall then proceeds untracked.
    pub fn arm_trap_after_syscall(
        &self,
        guest: &mut dyn GuestContext,
        process_id: u32,
        thread_id: u32,
        context: u64,
        params: TrapParams,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let key = TrapKey::new(process_id, thread_id);
        let mut registry = self.lock_registry();
        let Some(registry) = registry.as_mut() else {
            return false;
        };

        match registry.insert(key, context, params) {
            Ok(_) => {
                let rflags = guest.syscall_return_rflags() | X86_FLAGS_TF;
                guest.set_syscall_return_rflags(rflags);
                log::debug!(
                    "Trap armed for process: {:x}, thread: {:x} on core {}",
                    process_id,
                    thread_id,
                    guest.core_id()
                );
                true
            }
            Err(RegistryError::Full { capacity }) => {
                log::debug!(
                    "Trap registry full ({}), process: {:x}, thread: {:x} is not tracked",
                    capacity,
                    process_id,
                    thread_id
                );
                false
            }
        }
    }

    /// Consume the trap armed for (pid, tid), if this #DB is ours
    pub fn check_and_consume_trap(
        &self,
        guest: &mut dyn GuestContext,
        process_id: u32,
        thread_id: u32,
    ) -> Option<(u64, TrapParams)> {
        let rflags = guest.rflags();
        if rflags & X86_FLAGS_TF == 0 {
            return None;
        }

        let key = TrapKey::new(process_id, thread_id);
        let (context, params) = {
            let mut registry = self.lock_registry();
            let registry = registry.as_mut()?;
            let index = registry.search(key)?;
            let entry = *registry.get(index)?;

            guest.set_rflags(rflags & !X86_FLAGS_TF);
            registry.delete(index);
            (entry.context, entry.params)
        };

        self.handler
            .on_syscall_return(guest, process_id, thread_id, context, &params);
        Some((context, params))
    }

    /// Apply the transparent view to a CPUID result
    pub fn filter_cpuid(&self, leaf: u32, regs: &mut CpuidRegisters) {
        if self.is_enabled() {
            cpuid::hide_hypervisor(leaf, regs);
        }
    }

    /// Number of threads currently waiting for their return trap
    pub fn pending_traps(&self) -> usize {
        self.lock_registry().as_ref().map_or(0, |r| r.len())
    }
}
