use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcRootKind {
    Vm,
    MachineContext,
    GlobalList,
    GlobalTable,
    Finalizers,
    Unknown,
}

impl GcRootKind {
    pub fn parse(text: &str) -> Self {
        match text {
            "vm" => GcRootKind::Vm,
            "machine_context" => GcRootKind::MachineContext,
            "global_list" => GcRootKind::GlobalList,
            "global_tbl" => GcRootKind::GlobalTable,
            "finalizers" => GcRootKind::Finalizers,
            _ => GcRootKind::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GcRootKind::Vm => "vm",
            GcRootKind::MachineContext => "machine_context",
            GcRootKind::GlobalList => "global_list",
            GcRootKind::GlobalTable => "global_tbl",
            GcRootKind::Finalizers => "finalizers",
            GcRootKind::Unknown => "unknown",
        }
    }
}

/// Root declaration as seen in the stream, before id resolution.
#[derive(Debug, Clone, Copy)]
pub struct GcRootEntry {
    pub target: u64,
    pub context: Option<u64>,
    pub kind: GcRootKind,
}

/// Finalized root: target (and context, if any) resolved to object ids.
/// Entries whose target or context never resolved are dropped, not kept
/// dangling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GcRoot {
    pub object_id: u32,
    pub context_id: Option<u32>,
    pub kind: GcRootKind,
}
