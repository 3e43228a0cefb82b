use indexmap::IndexMap;

use crate::cpu::{Cpu, CpuId};
use crate::register::{Register, RegisterKey};

/// The set of discovered CPUs, iterated in discovery order so presentation
/// surfaces stay stable while nodes keep announcing themselves.
#[derive(Debug, Default)]
pub struct CpuRegistry {
    cpus: IndexMap<CpuId, Cpu>,
}

impl CpuRegistry {
    pub fn new() -> Self {
        CpuRegistry::default()
    }

    /// Admit a CPU. The broadcast id is never a valid key, and the first
    /// announcement for an id wins; both cases return false.
    pub(crate) fn insert(&mut self, cpu: Cpu) -> bool {
        let id = cpu.id();
        if id.is_broadcast() || self.cpus.contains_key(&id) {
            return false;
        }
        self.cpus.insert(id, cpu);
        true
    }

    pub fn get(&self, id: CpuId) -> Option<&Cpu> {
        self.cpus.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: CpuId) -> Option<&mut Cpu> {
        self.cpus.get_mut(&id)
    }

    pub fn contains(&self, id: CpuId) -> bool {
        self.cpus.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cpu> {
        self.cpus.values()
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.cpus.clear();
    }
}

/// All registers the catalog loader produced, across every CPU, iterated in
/// insertion order.
#[derive(Debug, Default)]
pub struct RegisterCatalog {
    registers: IndexMap<RegisterKey, Register>,
}

impl RegisterCatalog {
    pub fn new() -> Self {
        RegisterCatalog::default()
    }

    /// Insert a register under its key. At most one register may exist per
    /// (cpu, offset, direction); a duplicate is rejected.
    pub(crate) fn insert(&mut self, register: Register) -> bool {
        let key = register.key();
        if self.registers.contains_key(&key) {
            return false;
        }
        self.registers.insert(key, register);
        true
    }

    pub fn get(&self, key: RegisterKey) -> Option<&Register> {
        self.registers.get(&key)
    }

    pub(crate) fn get_mut(&mut self, key: RegisterKey) -> Option<&mut Register> {
        self.registers.get_mut(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.registers.values()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.registers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::Direction;
    use crate::value::VariableType;

    fn cpu(id: u8) -> Cpu {
        Cpu::new(
            CpuId(id),
            format!("node{id}"),
            "S".into(),
            "0.0.0.1".into(),
            "1.0.0.0".into(),
        )
    }

    #[test]
    fn broadcast_and_duplicates_are_rejected() {
        let mut registry = CpuRegistry::new();
        assert!(registry.insert(cpu(1)));
        assert!(!registry.insert(cpu(1)));
        assert!(!registry.insert(cpu(0xFF)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn iteration_follows_discovery_order() {
        let mut registry = CpuRegistry::new();
        for id in [7, 2, 9] {
            registry.insert(cpu(id));
        }
        let ids: Vec<u8> = registry.iter().map(|c| c.id().0).collect();
        assert_eq!(ids, [7, 2, 9]);
    }

    #[test]
    fn catalog_rejects_duplicate_keys() {
        let mut catalog = RegisterCatalog::new();
        let reg = Register::new(
            1,
            "a".into(),
            CpuId(1),
            Direction::Read,
            VariableType::Int,
            crate::register::Source::HandWrittenOffset,
            0,
            0x10,
        );
        assert!(catalog.insert(reg.clone()));
        assert!(!catalog.insert(reg));
        assert_eq!(catalog.len(), 1);
    }
}
