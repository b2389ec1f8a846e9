use crate::delta::types::DeltaCommand;

/// Merges runs of Copy commands whose base ranges are contiguous.
///
/// Commands pass through in order; a Copy is held back until the next
/// command shows whether it can be extended.
#[derive(Debug, Default)]
pub struct AggregateCopyOperations {
    pending: Option<(u64, u64)>,
}

impl AggregateCopyOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: DeltaCommand, out: &mut Vec<DeltaCommand>) {
        match command {
            DeltaCommand::Copy { base_offset, length } => {
                if let Some((start, len)) = &mut self.pending {
                    if *start + *len == base_offset {
                        *len += length;
                        return;
                    }
                }
                self.flush(out);
                self.pending = Some((base_offset, length));
            }
            data => {
                self.flush(out);
                out.push(data);
            }
        }
    }

    /// Emit the held Copy, if any
    pub fn flush(&mut self, out: &mut Vec<DeltaCommand>) {
        if let Some((base_offset, length)) = self.pending.take() {
            out.push(DeltaCommand::Copy { base_offset, length });
        }
    }
}

/// Merge contiguous copies in an already complete command list
pub fn aggregate(commands: Vec<DeltaCommand>) -> Vec<DeltaCommand> {
    if commands.len() <= 1 {
        return commands;
    }

    let mut aggregator = AggregateCopyOperations::new();
    let mut out = Vec::with_capacity(commands.len());
    for command in commands {
        aggregator.push(command, &mut out);
    }
    aggregator.flush(&mut out);
    out
}
