//! The schema (§4.2): an ordered list of `(name, type)` columns plus a
//! derived plan, shared via a reference-counted handle the way the teacher
//! workspace shares its column catalogues — `Layout` is cheap to `clone()`,
//! every clone refers to the same underlying data and lock counter.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use bcsv_base::{Error, Result};

use crate::column_type::{ColumnType, ScalarType, SCALAR_TYPE_ORDER};

#[derive(Clone, Debug)]
struct ColumnDef {
    name: String,
    ty: ColumnType,
}

/// Everything derivable from the `(name, type)` sequence alone.
#[derive(Clone, Debug, Default)]
pub(crate) struct Plan {
    /// In-memory scalar offset, valid for non-bool, non-string columns.
    pub scalar_offset: Vec<usize>,
    /// Packed wire-byte offset, valid for non-bool, non-string columns.
    pub wire_offset: Vec<usize>,
    /// Bit index within the bool bitset, valid for `Bool` columns.
    pub bool_bit_index: Vec<usize>,
    /// Column indices grouped by scalar type, in `SCALAR_TYPE_ORDER`.
    pub scalar_groups: [Vec<usize>; 10],
    /// STRING column indices, in layout order.
    pub string_columns: Vec<usize>,
    pub bool_count: usize,
    pub scalar_size: usize,
    pub wire_data_size: usize,
    pub wire_bits_size: usize,
}

impl Plan {
    fn derive(columns: &[ColumnDef]) -> Plan {
        let n = columns.len();
        let mut plan = Plan {
            scalar_offset: vec![0; n],
            wire_offset: vec![0; n],
            bool_bit_index: vec![0; n],
            scalar_groups: Default::default(),
            string_columns: Vec::new(),
            bool_count: 0,
            scalar_size: 0,
            wire_data_size: 0,
            wire_bits_size: 0,
        };

        let mut scalar_off = 0usize;
        let mut wire_off = 0usize;
        let mut bool_idx = 0usize;

        for (i, col) in columns.iter().enumerate() {
            match col.ty {
                ColumnType::Bool => {
                    plan.bool_bit_index[i] = bool_idx;
                    bool_idx += 1;
                }
                ColumnType::String => {
                    plan.string_columns.push(i);
                }
                other => {
                    let st = other.scalar_type().expect("non-bool non-string has a scalar type");
                    let width = st.byte_width();
                    plan.scalar_offset[i] = scalar_off;
                    plan.wire_offset[i] = wire_off;
                    scalar_off += width;
                    wire_off += width;
                    let group_idx = SCALAR_TYPE_ORDER.iter().position(|t| *t == st).unwrap();
                    plan.scalar_groups[group_idx].push(i);
                }
            }
        }

        plan.bool_count = bool_idx;
        plan.scalar_size = scalar_off;
        plan.wire_data_size = wire_off;
        plan.wire_bits_size = (plan.bool_count + 7) / 8;
        plan
    }
}

struct LayoutData {
    columns: Vec<ColumnDef>,
    plan: Plan,
    version: u64,
}

struct LayoutInner {
    data: RwLock<LayoutData>,
    lock_count: AtomicU32,
}

/// The schema, shared via `Arc`. Cloning a `Layout` clones the handle, not
/// the data — every clone observes the same structural-lock counter.
#[derive(Clone)]
pub struct Layout(Arc<LayoutInner>);

impl Layout {
    pub fn new(columns: Vec<(String, ColumnType)>) -> Result<Layout> {
        let mut seen = std::collections::HashSet::with_capacity(columns.len());
        let mut defs = Vec::with_capacity(columns.len());
        for (name, ty) in columns {
            if !seen.insert(name.clone()) {
                return Err(Error::DuplicateColumnName(name));
            }
            defs.push(ColumnDef { name, ty });
        }
        if defs.len() > 65_535 {
            return Err(Error::OutOfRange(defs.len()));
        }
        let plan = Plan::derive(&defs);
        Ok(Layout(Arc::new(LayoutInner {
            data: RwLock::new(LayoutData {
                columns: defs,
                plan,
                version: 0,
            }),
            lock_count: AtomicU32::new(0),
        })))
    }

    pub fn empty() -> Layout {
        Layout::new(Vec::new()).expect("empty layout is always valid")
    }

    fn check_unlocked(&self) -> Result<()> {
        let count = self.0.lock_count.load(Ordering::Acquire);
        if count > 0 {
            Err(Error::LayoutLocked { count })
        } else {
            Ok(())
        }
    }

    /// Acquires a structural-lock guard; structural mutations fail while any
    /// guard is outstanding.
    pub fn acquire_guard(&self) -> LayoutGuard {
        self.0.lock_count.fetch_add(1, Ordering::AcqRel);
        LayoutGuard { inner: self.0.clone() }
    }

    pub fn lock_count(&self) -> u32 {
        self.0.lock_count.load(Ordering::Acquire)
    }

    pub fn version(&self) -> u64 {
        self.0.data.read().unwrap().version
    }

    pub fn column_count(&self) -> usize {
        self.0.data.read().unwrap().columns.len()
    }

    pub fn column_name(&self, i: usize) -> Result<String> {
        let data = self.0.data.read().unwrap();
        data.columns
            .get(i)
            .map(|c| c.name.clone())
            .ok_or(Error::OutOfRange(i))
    }

    pub fn column_type(&self, i: usize) -> Result<ColumnType> {
        let data = self.0.data.read().unwrap();
        data.columns.get(i).map(|c| c.ty).ok_or(Error::OutOfRange(i))
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        let data = self.0.data.read().unwrap();
        data.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::UnknownColumn(name.to_string()))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_ok()
    }

    pub fn column_offset(&self, i: usize) -> Result<usize> {
        let data = self.0.data.read().unwrap();
        data.plan.scalar_offset.get(i).copied().ok_or(Error::OutOfRange(i))
    }

    pub fn column_offset_wire(&self, i: usize) -> Result<usize> {
        let data = self.0.data.read().unwrap();
        data.plan.wire_offset.get(i).copied().ok_or(Error::OutOfRange(i))
    }

    pub fn column_bool_index(&self, i: usize) -> Result<usize> {
        let data = self.0.data.read().unwrap();
        data.plan.bool_bit_index.get(i).copied().ok_or(Error::OutOfRange(i))
    }

    pub fn bool_count(&self) -> usize {
        self.0.data.read().unwrap().plan.bool_count
    }

    pub fn string_count(&self) -> usize {
        self.0.data.read().unwrap().plan.string_columns.len()
    }

    pub fn scalar_size(&self) -> usize {
        self.0.data.read().unwrap().plan.scalar_size
    }

    pub fn wire_data_size(&self) -> usize {
        self.0.data.read().unwrap().plan.wire_data_size
    }

    pub fn wire_bits_size(&self) -> usize {
        self.0.data.read().unwrap().plan.wire_bits_size
    }

    pub fn wire_string_count(&self) -> usize {
        self.string_count()
    }

    /// Fixed portion of a FLAT row: bits + scalars + 2 bytes per string
    /// length, excluding the variable-length string payloads themselves.
    pub fn wire_fixed_size(&self) -> usize {
        let data = self.0.data.read().unwrap();
        data.plan.wire_bits_size + data.plan.wire_data_size + 2 * data.plan.string_columns.len()
    }

    pub fn type_count(&self, ty: ColumnType) -> usize {
        let data = self.0.data.read().unwrap();
        data.columns.iter().filter(|c| c.ty == ty).count()
    }

    pub(crate) fn with_plan<R>(&self, f: impl FnOnce(&Plan) -> R) -> R {
        let data = self.0.data.read().unwrap();
        f(&data.plan)
    }

    pub(crate) fn with_columns<R>(&self, f: impl FnOnce(&[ColumnType]) -> R) -> R {
        let data = self.0.data.read().unwrap();
        let tys: Vec<ColumnType> = data.columns.iter().map(|c| c.ty).collect();
        f(&tys)
    }

    /// Non-bool, non-string column indices in the fixed type-grouped order
    /// ZOH and DELTA headers/payloads iterate (`SCALAR_TYPE_ORDER`, layout
    /// order within each type).
    pub(crate) fn numeric_columns_ordered(&self) -> Vec<usize> {
        let data = self.0.data.read().unwrap();
        data.plan.scalar_groups.iter().flatten().copied().collect()
    }

    /// STRING column indices in layout order.
    pub(crate) fn string_columns_ordered(&self) -> Vec<usize> {
        self.0.data.read().unwrap().plan.string_columns.clone()
    }

    pub fn add_column(&self, name: impl Into<String>, ty: ColumnType) -> Result<()> {
        self.check_unlocked()?;
        let name = name.into();
        let mut data = self.0.data.write().unwrap();
        if data.columns.iter().any(|c| c.name == name) {
            return Err(Error::DuplicateColumnName(name));
        }
        if data.columns.len() >= 65_535 {
            return Err(Error::OutOfRange(data.columns.len()));
        }
        data.columns.push(ColumnDef { name, ty });
        data.plan = Plan::derive(&data.columns);
        data.version += 1;
        Ok(())
    }

    pub fn remove_column(&self, i: usize) -> Result<()> {
        self.check_unlocked()?;
        let mut data = self.0.data.write().unwrap();
        if i >= data.columns.len() {
            return Err(Error::OutOfRange(i));
        }
        data.columns.remove(i);
        data.plan = Plan::derive(&data.columns);
        data.version += 1;
        Ok(())
    }

    pub fn set_column_type(&self, i: usize, ty: ColumnType) -> Result<()> {
        self.check_unlocked()?;
        let mut data = self.0.data.write().unwrap();
        if i >= data.columns.len() {
            return Err(Error::OutOfRange(i));
        }
        data.columns[i].ty = ty;
        data.plan = Plan::derive(&data.columns);
        data.version += 1;
        Ok(())
    }

    pub fn set_columns(&self, columns: Vec<(String, ColumnType)>) -> Result<()> {
        self.check_unlocked()?;
        let mut seen = std::collections::HashSet::with_capacity(columns.len());
        let mut defs = Vec::with_capacity(columns.len());
        for (name, ty) in columns {
            if !seen.insert(name.clone()) {
                return Err(Error::DuplicateColumnName(name));
            }
            defs.push(ColumnDef { name, ty });
        }
        if defs.len() > 65_535 {
            return Err(Error::OutOfRange(defs.len()));
        }
        let mut data = self.0.data.write().unwrap();
        data.plan = Plan::derive(&defs);
        data.columns = defs;
        data.version += 1;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.set_columns(Vec::new())
    }

    /// `setColumnName` is always permitted, even under a structural lock.
    pub fn set_column_name(&self, i: usize, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        let mut data = self.0.data.write().unwrap();
        if i >= data.columns.len() {
            return Err(Error::OutOfRange(i));
        }
        if data.columns.iter().enumerate().any(|(j, c)| j != i && c.name == name) {
            return Err(Error::DuplicateColumnName(name));
        }
        data.columns[i].name = name;
        data.version += 1;
        Ok(())
    }

    /// True iff column count and every column type match in order; names
    /// are ignored.
    pub fn is_compatible(&self, other: &Layout) -> bool {
        let a = self.0.data.read().unwrap();
        let b = other.0.data.read().unwrap();
        a.columns.len() == b.columns.len()
            && a.columns.iter().zip(b.columns.iter()).all(|(x, y)| x.ty == y.ty)
    }
}

/// RAII structural-lock holder. Dropping it decrements the layout's lock
/// counter; while any guard is outstanding, structural mutations fail with
/// `LayoutLocked`.
pub struct LayoutGuard {
    inner: Arc<LayoutInner>,
}

impl Drop for LayoutGuard {
    fn drop(&mut self) {
        self.inner.lock_count.fetch_sub(1, Ordering::AcqRel);
    }
}
