use pincore::{FlowError, FlowId};

/// Active-flow stack for nested flows.
///
/// The bus keeps one stack for editing and forks a copy for every execution
/// request; a request that leaves its fork at a different depth than it found
/// it poisons the editing stack until [`ContextStack::reset`].
#[derive(Debug, Clone, Default)]
pub struct ContextStack {
    frames: Vec<FlowId>,
    invalidated: bool,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, flow: FlowId) -> Result<(), FlowError> {
        self.ensure_valid()?;
        self.frames.push(flow);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<FlowId, FlowError> {
        self.ensure_valid()?;
        self.frames.pop().ok_or(FlowError::EmptyContext)
    }

    pub fn current(&self) -> Option<FlowId> {
        self.frames.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[FlowId] {
        &self.frames
    }

    /// Depth to compare against with [`ContextStack::verify_balanced`]
    pub fn checkpoint(&self) -> usize {
        self.frames.len()
    }

    pub fn verify_balanced(&self, checkpoint: usize) -> Result<(), FlowError> {
        if self.frames.len() != checkpoint {
            return Err(FlowError::UnbalancedContext {
                expected: checkpoint,
                actual: self.frames.len(),
            });
        }
        Ok(())
    }

    /// Take back a finished request's fork of this stack. A fork left at a
    /// different depth than `checkpoint` invalidates this stack.
    pub fn settle_fork(&mut self, fork: &ContextStack, checkpoint: usize) -> Result<(), FlowError> {
        if let Err(e) = fork.verify_balanced(checkpoint) {
            self.invalidate();
            return Err(e);
        }
        Ok(())
    }

    pub fn invalidate(&mut self) {
        tracing::error!(depth = self.frames.len(), "Context stack invalidated");
        self.invalidated = true;
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Clear every frame and accept requests again
    pub fn reset(&mut self) {
        self.frames.clear();
        self.invalidated = false;
    }

    pub fn ensure_valid(&self) -> Result<(), FlowError> {
        if self.invalidated {
            return Err(FlowError::ContextInvalidated);
        }
        Ok(())
    }

    /// Drop frames that name a flow which no longer exists
    pub fn forget(&mut self, flow: FlowId) {
        self.frames.retain(|f| *f != flow);
    }
}
