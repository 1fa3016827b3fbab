//! Frequency-ranked compact identifier assignment.
//!
//! The emitted program wants the hottest symbols to carry the shortest
//! names. Methods, types, static fields and the per-method local-variable
//! cluster ranks share one global namespace: their usage counts are
//! stable-sorted descending (ties keep first-discovery order) and names
//! are drawn from an `a, b, .., z, aa, ..` sequence that skips target
//! language reserved words.
//!
//! Instance fields live in their own per-object namespace. They are named
//! per inheritance chain: a type's fields resume the sequence after its
//! ancestors' allocation, so a derived type never reuses a base type's
//! field name on the same object.
//!
//! The assignment is a pure function of the reachability data, so running
//! it twice yields identical names.

use std::collections::HashMap;

use crate::{
    ir::{expr::ExprId, expr::ExprKind, MethodIr},
    lower::PhiClusters,
    model::{FieldFlags, FieldId, MethodId, ModuleModel, TypeId},
    resolve::closure::ReachabilitySet,
    Result,
};

/// Target-language reserved words the generator must never yield.
const RESERVED: &[&str] = &[
    "do", "if", "in", "for", "let", "new", "try", "var", "case", "else", "enum", "eval", "null",
    "this", "true", "void", "with", "await", "break", "catch", "class", "const", "false", "super",
    "throw", "while", "yield", "delete", "export", "import", "public", "return", "static",
    "switch", "typeof", "default", "extends", "finally", "package", "private", "continue",
    "debugger", "function", "arguments", "interface", "protected", "implements", "instanceof",
];

/// Yields `a, b, .., z, aa, ab, ..`, skipping reserved words.
#[derive(Debug, Clone, Default)]
pub struct NameGenerator {
    next: u64,
}

impl NameGenerator {
    /// Creates a generator starting at `a`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next identifier in the sequence.
    pub fn next_name(&mut self) -> String {
        loop {
            let name = bijective_base26(self.next);
            self.next += 1;
            if !RESERVED.contains(&name.as_str()) {
                return name;
            }
        }
    }
}

fn bijective_base26(mut index: u64) -> String {
    let mut bytes = Vec::new();
    loop {
        bytes.push(b'a' + u8::try_from(index % 26).unwrap_or(0));
        index /= 26;
        if index == 0 {
            break;
        }
        index -= 1;
    }
    bytes.reverse();
    String::from_utf8(bytes).unwrap_or_default()
}

/// Returns the identifier at a fixed position of the skipping sequence.
fn name_at(position: usize) -> String {
    let mut generator = NameGenerator::new();
    let mut name = String::new();
    for _ in 0..=position {
        name = generator.next_name();
    }
    name
}

/// One entry of the global frequency-ranked namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Symbol {
    LocalRank(usize),
    Method(MethodId),
    Type(TypeId),
    StaticField(FieldId),
}

/// The finished symbol-to-identifier assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct NameAssignment {
    methods: HashMap<MethodId, String>,
    types: HashMap<TypeId, String>,
    static_fields: HashMap<FieldId, String>,
    instance_fields: HashMap<FieldId, String>,
    local_ranks: Vec<String>,
    marshal: HashMap<(TypeId, FieldId), String>,
}

impl NameAssignment {
    /// Assigns identifiers from the finalized reachability data.
    ///
    /// `local_rank_counts[r]` is the summed usage of every method's rank-r
    /// local cluster (see [`local_cluster_counts`]).
    pub fn build(
        module: &ModuleModel,
        reach: &ReachabilitySet,
        local_rank_counts: &[usize],
    ) -> Result<Self> {
        let mut symbols: Vec<(Symbol, usize)> = Vec::new();
        for (rank, &count) in local_rank_counts.iter().enumerate() {
            symbols.push((Symbol::LocalRank(rank), count));
        }
        for &method in reach.methods() {
            symbols.push((Symbol::Method(method), reach.method_count(method)));
        }
        for &ty in reach.types() {
            symbols.push((Symbol::Type(ty), reach.type_count(ty)));
        }
        let mut instance_fields: Vec<FieldId> = Vec::new();
        for &field in reach.fields() {
            if module.field(field)?.flags.contains(FieldFlags::STATIC) {
                symbols.push((Symbol::StaticField(field), reach.field_count(field)));
            } else {
                instance_fields.push(field);
            }
        }
        // Stable sort: ties keep construction order, which is discovery
        // order within each symbol class.
        symbols.sort_by(|a, b| b.1.cmp(&a.1));

        let mut assignment = Self {
            methods: HashMap::new(),
            types: HashMap::new(),
            static_fields: HashMap::new(),
            instance_fields: HashMap::new(),
            local_ranks: vec![String::new(); local_rank_counts.len()],
            marshal: HashMap::new(),
        };
        let mut generator = NameGenerator::new();
        for (symbol, _) in symbols {
            let name = generator.next_name();
            match symbol {
                Symbol::LocalRank(rank) => assignment.local_ranks[rank] = name,
                Symbol::Method(method) => {
                    assignment.methods.insert(method, name);
                }
                Symbol::Type(ty) => {
                    assignment.types.insert(ty, name);
                }
                Symbol::StaticField(field) => {
                    let declaring = module.field(field)?.declaring_type;
                    assignment.marshal.insert((declaring, field), name.clone());
                    assignment.static_fields.insert(field, name);
                }
            }
        }

        assignment.assign_instance_fields(module, reach, &instance_fields)?;
        Ok(assignment)
    }

    /// Names instance fields per inheritance chain, base-first, each type
    /// resuming the sequence after its ancestors' allocation.
    fn assign_instance_fields(
        &mut self,
        module: &ModuleModel,
        reach: &ReachabilitySet,
        accessed: &[FieldId],
    ) -> Result<()> {
        let mut allocated: HashMap<TypeId, usize> = HashMap::new();
        for ty in module.types_base_first() {
            let desc = module.type_desc(ty)?;
            let start = desc
                .base
                .and_then(|base| allocated.get(&base).copied())
                .unwrap_or(0);
            let mut own: Vec<FieldId> = desc
                .fields
                .iter()
                .copied()
                .filter(|f| accessed.contains(f))
                .collect();
            own.sort_by(|&a, &b| reach.field_count(b).cmp(&reach.field_count(a)));
            for (offset, field) in own.iter().enumerate() {
                let name = name_at(start + offset);
                self.marshal.insert((ty, *field), name.clone());
                self.instance_fields.insert(*field, name);
            }
            allocated.insert(ty, start + own.len());
        }
        Ok(())
    }

    /// Returns a method's identifier.
    #[must_use]
    pub fn method(&self, method: MethodId) -> Option<&str> {
        self.methods.get(&method).map(String::as_str)
    }

    /// Returns a type's identifier.
    #[must_use]
    pub fn ty(&self, ty: TypeId) -> Option<&str> {
        self.types.get(&ty).map(String::as_str)
    }

    /// Returns a field's identifier, static or instance.
    #[must_use]
    pub fn field(&self, field: FieldId) -> Option<&str> {
        self.static_fields
            .get(&field)
            .or_else(|| self.instance_fields.get(&field))
            .map(String::as_str)
    }

    /// Returns the shared identifier of a local-cluster rank.
    #[must_use]
    pub fn local_rank(&self, rank: usize) -> Option<&str> {
        self.local_ranks.get(rank).map(String::as_str)
    }

    /// Returns the (declaring type, field) to identifier map used for
    /// runtime data marshalling.
    #[must_use]
    pub fn marshal(&self) -> &HashMap<(TypeId, FieldId), String> {
        &self.marshal
    }
}

/// Returns one method's local-cluster usage counts, rank order.
///
/// Rank 0 is the most-used phi-connected cluster; ties break on the lowest
/// cluster representative id.
#[must_use]
pub fn local_cluster_counts(ir: &MethodIr) -> Vec<usize> {
    ranked_clusters(ir).into_iter().map(|(_, c)| c).collect()
}

/// Returns one method's cluster-representative to rank map for the emitter.
#[must_use]
pub fn local_rank_map(ir: &MethodIr) -> HashMap<ExprId, usize> {
    ranked_clusters(ir)
        .into_iter()
        .enumerate()
        .map(|(rank, (representative, _))| (representative, rank))
        .collect()
}

fn ranked_clusters(ir: &MethodIr) -> Vec<(ExprId, usize)> {
    let clusters = PhiClusters::build(ir.exprs());
    let mut counts: HashMap<ExprId, usize> = HashMap::new();
    for id in ir.exprs().ids() {
        if matches!(ir.exprs().kind(id), ExprKind::Local(_) | ExprKind::Phi(_)) {
            *counts.entry(clusters.representative(id)).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(ExprId, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
}
