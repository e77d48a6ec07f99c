use std::any::type_name;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use petgraph::graph::NodeIndex;

use crate::core::{ArcStr, DynamicResult};
use crate::engine::Inputs;
use crate::error::DeriveError;

pub(crate) trait TypedDerive: Send + Sync {
    /// The concrete output type of this derivation.
    type Output: Send + Sync + 'static;

    fn derive(&self, inputs: &Inputs<'_>) -> Result<Self::Output, DeriveError>;
}

/// The type-erased face of a derivation, which lets the graph hold nodes
/// with different output types.
pub(crate) trait Derive: Send + Sync {
    fn output_type_name(&self) -> &'static str;

    fn derive(&self, inputs: &Inputs<'_>) -> DynamicResult;
}

// This is where the type erasure actually happens.
impl<T> Derive for T
where
    T: TypedDerive + 'static,
{
    fn output_type_name(&self) -> &'static str {
        type_name::<T::Output>()
    }

    fn derive(&self, inputs: &Inputs<'_>) -> DynamicResult {
        let output = <T as TypedDerive>::derive(self, inputs)?;
        Ok(Arc::new(output))
    }
}

pub(crate) struct FnDerive<F, R> {
    callback: F,
    _phantom: PhantomData<fn() -> R>,
}

impl<F, R> FnDerive<F, R> {
    pub(crate) fn new(callback: F) -> Self {
        Self {
            callback,
            _phantom: PhantomData,
        }
    }
}

impl<F, R> TypedDerive for FnDerive<F, R>
where
    F: Fn(&Inputs<'_>) -> Result<R, DeriveError> + Send + Sync,
    R: Send + Sync + 'static,
{
    type Output = R;

    fn derive(&self, inputs: &Inputs<'_>) -> Result<R, DeriveError> {
        (self.callback)(inputs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stale,
    Fresh,
}

/// A named derivation with its memoized result.
pub(crate) struct DerivationNode {
    pub name: ArcStr,
    pub inputs: Vec<ArcStr>,
    func: Arc<dyn Derive>,
    cache: Option<DynamicResult>,
    state: State,
    version: u64,
}

impl DerivationNode {
    pub(crate) fn new(name: ArcStr, inputs: Vec<ArcStr>, func: Arc<dyn Derive>) -> Self {
        Self {
            name,
            inputs,
            func,
            cache: None,
            state: State::Stale,
            version: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_fn<F, R>(name: &str, inputs: &[&str], callback: F) -> Self
    where
        F: Fn(&Inputs<'_>) -> Result<R, DeriveError> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        Self::new(
            Arc::from(name),
            inputs.iter().map(|&input| Arc::from(input)).collect(),
            Arc::new(FnDerive::new(callback)),
        )
    }

    pub(crate) fn is_fresh(&self) -> bool {
        self.state == State::Fresh
    }

    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn output_type_name(&self) -> &'static str {
        self.func.output_type_name()
    }

    pub(crate) fn cached(&self) -> Option<&DynamicResult> {
        self.cache.as_ref()
    }

    /// Marks the node stale. Returns `false` if it already was.
    pub(crate) fn invalidate(&mut self) -> bool {
        let was_fresh = self.state == State::Fresh;
        self.state = State::Stale;
        was_fresh
    }

    /// Runs the function against `inputs`. A panic inside the function is
    /// turned into a computation failure.
    pub(crate) fn compute(&self, inputs: &Inputs<'_>) -> DynamicResult {
        let func = &self.func;
        match catch_unwind(AssertUnwindSafe(|| func.derive(inputs))) {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("derivation panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("derivation panicked: {s}")
                } else {
                    String::from("derivation panicked with unknown payload")
                };

                Err(anyhow::anyhow!(msg).into())
            }
        }
    }

    pub(crate) fn store(&mut self, result: DynamicResult) {
        self.cache = Some(result);
        self.state = State::Fresh;
        self.version += 1;
    }
}

/// A type-safe reference to a derivation in the graph.
///
/// A `NodeRef<T>` is a lightweight, copyable token for the value of type `T`
/// the node produces. It is handed out by the
/// [`Blueprint`](crate::Blueprint) when the node is registered and used to
/// read the node or bind it to an output slot.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct NodeRef<T> {
    pub(crate) index: NodeIndex,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> NodeRef<T> {
    pub(crate) fn new(index: NodeIndex) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Returns the underlying `NodeIndex` of the node in the graph.
    pub fn index(&self) -> NodeIndex {
        self.index
    }
}

impl<T> Clone for NodeRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NodeRef<T> {}

/// Downcasts a cached result to the concrete type the caller expects.
pub(crate) fn downcast<T>(result: &DynamicResult) -> Option<Result<Arc<T>, DeriveError>>
where
    T: Send + Sync + 'static,
{
    match result {
        Ok(value) => Arc::clone(value).downcast::<T>().ok().map(Ok),
        Err(err) => Some(Err(err.clone())),
    }
}
