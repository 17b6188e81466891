//! CPUID results seen by the guest while transparent-mode is on

/// Processor info and feature bits
pub const CPUID_PROCESSOR_AND_PROCESSOR_FEATURE_IDENTIFIERS: u32 = 0x0000_0001;

/// Hypervisor vendor leaf
pub const CPUID_HV_VENDOR_AND_MAX_FUNCTIONS: u32 = 0x4000_0000;

/// Hypervisor interface leaf
pub const HYPERV_CPUID_INTERFACE: u32 = 0x4000_0001;

/// ECX bit reserved by Intel and AMD to report a hypervisor
pub const HYPERV_HYPERVISOR_PRESENT_BIT: u32 = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuidRegisters {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Scrub every trace of the hypervisor from the result of `leaf`
pub fn hide_hypervisor(leaf: u32, regs: &mut CpuidRegisters) {
    match leaf {
        CPUID_PROCESSOR_AND_PROCESSOR_FEATURE_IDENTIFIERS => {
            regs.ecx &= !HYPERV_HYPERVISOR_PRESENT_BIT;
        }
        CPUID_HV_VENDOR_AND_MAX_FUNCTIONS | HYPERV_CPUID_INTERFACE => {
            *regs = CpuidRegisters::default();
        }
        _ => {}
    }
}
