use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use goblin::elf::Elf as GElf;
use goblin::elf::sym::Sym;
use goblin::strtab::Strtab;
use memmap2::MmapOptions;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Goblin Error: {0}")]
    GoblinError(#[from] goblin::error::Error),

    #[error("Stdio Error: {0}")]
    StdIOError(#[from] std::io::Error),

    #[error("Symbol '{0}' not found")]
    MissingSymbol(String),
}

fn collect_symbols<'a>(
    symbols_map: &mut HashMap<String, u64>,
    syms: impl Iterator<Item = Sym>,
    strtab: &Strtab<'a>
) {
    for sym in syms {
        if sym.st_value == 0 {
            continue;
        }
        if let Some(name) = strtab.get_at(sym.st_name) {
            if name.is_empty() {
                continue;
            }
            // versioned aliases share a value, first one wins
            symbols_map.entry(name.to_string()).or_insert(sym.st_value);
        }
    }
}

#[derive(Clone, Debug)]
pub struct Elf {
    pub path: Option<PathBuf>,
    pub symbols: HashMap<String, u64>,
}

impl Elf {
    pub fn new(data: &[u8]) -> Result<Elf, Error> {
        let elf = GElf::parse(data)?;

        // shared libraries are usually stripped down to .dynsym
        let mut symbols = HashMap::new();
        collect_symbols(&mut symbols, elf.syms.iter(), &elf.strtab);
        collect_symbols(&mut symbols, elf.dynsyms.iter(), &elf.dynstrtab);

        Ok(Self { path: None, symbols })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Elf, Error> {
        let file = File::open(path.as_ref())?;
        // read-only mapping of a file nobody else is writing to
        let mmap = unsafe { MmapOptions::new().map(&file) }?;
        let mut elf = Elf::new(&mmap)?;
        elf.path = Some(path.as_ref().to_path_buf());
        Ok(elf)
    }

    /// Offset of `name` relative to the load base
    pub fn symbol(&self, name: &str) -> Result<u64, Error> {
        self.symbols.get(name).copied()
            .ok_or_else(|| Error::MissingSymbol(name.to_string()))
    }
}
