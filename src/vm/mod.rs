//! RGC-to-VM interface: bindings implement the traits in this module.
//!
//! The collector never interprets objects on its own. It asks the object model for sizes, ages
//! and the forwarding word, and asks the scanning trait for reference slots.

mod object_model;
mod scanning;
pub mod slot;

pub use self::object_model::ObjectModel;
pub use self::scanning::ObjectTracer;
pub use self::scanning::Scanning;
pub use self::scanning::SlotVisitor;

/// The `VMBinding` trait associates with each trait, and provides VM-specific constants.
pub trait VMBinding
where
    Self: Sized + 'static + Send + Sync + Default,
{
    /// The binding's object model.
    type VMObjectModel: ObjectModel<Self>;
    /// The binding's object scanner.
    type VMScanning: Scanning<Self>;
}

#[cfg(test)]
mod tests;
