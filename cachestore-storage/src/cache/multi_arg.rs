//! Batch shape resolution.
//!
//! A batch of records is passed as one of a fixed set of wrappers, each
//! tagged with its [`MultiArgType`]. The shape is checked once per call,
//! before any I/O, and each element then carries its own capability as a
//! [`RecordRef`] or [`RecordMut`].
//!
//! | Wrapper          | Shape                                          |
//! |------------------|------------------------------------------------|
//! | [`Structs`]      | plain records by value                         |
//! | [`StructPtrs`]   | plain records behind optional boxes            |
//! | [`LoadSavers`]   | custom-serializable records                    |
//! | [`Interfaces`]   | mixed records, each with its own capability    |
//!
//! A bare [`PropertyList`] is the store's own low-level representation of a
//! single record, not a batch, and resolves as [`MultiArgType::Invalid`].

use cachestore_core::{PropertyList, ShapeError};

use crate::record::{DynRecord, Entity, PropertyLoadSaver, RecordMut, RecordRef};

/// The recognized batch shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiArgType {
    Invalid,
    PropertyLoadSaver,
    Struct,
    StructPtr,
    Interface,
}

/// A batch of records addressed by position.
pub trait MultiArg: Send + Sync {
    fn multi_arg_type(&self) -> MultiArgType;

    /// Name used when the batch is rejected.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read access to the record at `index`. `None` for a nil slot.
    fn record(&self, index: usize) -> Option<RecordRef<'_>>;

    /// Write access to the record at `index`, allocating nil slots where
    /// the shape allows it.
    fn record_mut(&mut self, index: usize) -> Option<RecordMut<'_>>;
}

/// Plain records by value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Structs<T: Entity>(pub Vec<T>);

impl<T: Entity> MultiArg for Structs<T> {
    fn multi_arg_type(&self) -> MultiArgType {
        MultiArgType::Struct
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn record(&self, index: usize) -> Option<RecordRef<'_>> {
        self.0.get(index).map(RecordRef::entity)
    }

    fn record_mut(&mut self, index: usize) -> Option<RecordMut<'_>> {
        self.0.get_mut(index).map(RecordMut::entity)
    }
}

/// Plain records behind optional boxes.
///
/// A `None` slot cannot be written from, but is filled with a default
/// record when loaded into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructPtrs<T: Entity>(pub Vec<Option<Box<T>>>);

impl<T: Entity> MultiArg for StructPtrs<T> {
    fn multi_arg_type(&self) -> MultiArgType {
        MultiArgType::StructPtr
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn record(&self, index: usize) -> Option<RecordRef<'_>> {
        self.0
            .get(index)?
            .as_deref()
            .map(RecordRef::entity)
    }

    fn record_mut(&mut self, index: usize) -> Option<RecordMut<'_>> {
        let slot = self.0.get_mut(index)?;
        let record = slot.get_or_insert_with(|| Box::new(T::default()));
        Some(RecordMut::entity(&mut **record))
    }
}

/// Custom-serializable records, by value or boxed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSavers<P: PropertyLoadSaver>(pub Vec<P>);

impl<P: PropertyLoadSaver> MultiArg for LoadSavers<P> {
    fn multi_arg_type(&self) -> MultiArgType {
        MultiArgType::PropertyLoadSaver
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn record(&self, index: usize) -> Option<RecordRef<'_>> {
        self.0.get(index).map(RecordRef::load_saver)
    }

    fn record_mut(&mut self, index: usize) -> Option<RecordMut<'_>> {
        self.0.get_mut(index).map(RecordMut::load_saver)
    }
}

/// Records of mixed types.
#[derive(Default)]
pub struct Interfaces(pub Vec<DynRecord>);

impl MultiArg for Interfaces {
    fn multi_arg_type(&self) -> MultiArgType {
        MultiArgType::Interface
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn record(&self, index: usize) -> Option<RecordRef<'_>> {
        self.0.get(index).map(DynRecord::as_record)
    }

    fn record_mut(&mut self, index: usize) -> Option<RecordMut<'_>> {
        self.0.get_mut(index).map(DynRecord::as_record_mut)
    }
}

impl MultiArg for PropertyList {
    fn multi_arg_type(&self) -> MultiArgType {
        MultiArgType::Invalid
    }

    fn len(&self) -> usize {
        PropertyList::len(self)
    }

    fn record(&self, _index: usize) -> Option<RecordRef<'_>> {
        None
    }

    fn record_mut(&mut self, _index: usize) -> Option<RecordMut<'_>> {
        None
    }
}

/// A single record viewed as a batch of one.
pub(crate) struct SingleRef<'a>(pub RecordRef<'a>);

impl MultiArg for SingleRef<'_> {
    fn multi_arg_type(&self) -> MultiArgType {
        match self.0 {
            RecordRef::Struct(_) => MultiArgType::Struct,
            RecordRef::LoadSaver(_) => MultiArgType::PropertyLoadSaver,
        }
    }

    fn len(&self) -> usize {
        1
    }

    fn record(&self, index: usize) -> Option<RecordRef<'_>> {
        (index == 0).then_some(self.0)
    }

    fn record_mut(&mut self, _index: usize) -> Option<RecordMut<'_>> {
        None
    }
}

/// A single load destination viewed as a batch of one.
pub(crate) struct SingleMut<'a>(pub RecordMut<'a>);

impl MultiArg for SingleMut<'_> {
    fn multi_arg_type(&self) -> MultiArgType {
        match self.0 {
            RecordMut::Struct(_) => MultiArgType::Struct,
            RecordMut::LoadSaver(_) => MultiArgType::PropertyLoadSaver,
        }
    }

    fn len(&self) -> usize {
        1
    }

    fn record(&self, index: usize) -> Option<RecordRef<'_>> {
        if index == 0 {
            Some(self.0.as_ref())
        } else {
            None
        }
    }

    fn record_mut(&mut self, index: usize) -> Option<RecordMut<'_>> {
        if index == 0 {
            Some(self.0.reborrow())
        } else {
            None
        }
    }
}

/// Resolve the shape of a batch, rejecting anything that is not a record
/// sequence.
pub fn check_multi_arg<A: MultiArg + ?Sized>(arg: &A) -> Result<MultiArgType, ShapeError> {
    match arg.multi_arg_type() {
        MultiArgType::Invalid => Err(ShapeError::InvalidMultiArg {
            type_name: arg.type_name(),
        }),
        shape => Ok(shape),
    }
}

/// Keys and records must pair up one to one.
pub fn check_lengths(keys: usize, records: usize) -> Result<(), ShapeError> {
    if keys != records {
        return Err(ShapeError::LengthMismatch { keys, records });
    }
    Ok(())
}

/// Every slot of a batch being written must hold a record.
pub fn check_no_nil<A: MultiArg + ?Sized>(arg: &A) -> Result<(), ShapeError> {
    match (0..arg.len()).find(|&i| arg.record(i).is_none()) {
        Some(index) => Err(ShapeError::NilElement { index }),
        None => Ok(()),
    }
}
