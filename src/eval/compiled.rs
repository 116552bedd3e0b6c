// eval/compiled.rs — Target handles resolved to slots at graph construction
//
// Edge target handles arrive as strings: plain names ("Input", "Factor") or
// indexed forms ("Inputs[2]"). They are resolved once into a fixed array of
// named slots plus an index-sorted list, so the evaluator never touches a
// string while sampling.

use smallvec::SmallVec;

/// Named input slots understood by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Handle {
    Input,
    InputA,
    InputB,
    Factor,
    Condition,
    TrueInput,
    FalseInput,
    Offset,
    Amplitude,
    YProvider,
    WarpSource,
    Curve,
}

impl Handle {
    pub const COUNT: usize = 12;

    pub fn parse(name: &str) -> Option<Handle> {
        Some(match name {
            "Input" => Handle::Input,
            "InputA" => Handle::InputA,
            "InputB" => Handle::InputB,
            "Factor" => Handle::Factor,
            "Condition" => Handle::Condition,
            "TrueInput" => Handle::TrueInput,
            "FalseInput" => Handle::FalseInput,
            "Offset" => Handle::Offset,
            "Amplitude" => Handle::Amplitude,
            "YProvider" => Handle::YProvider,
            "WarpSource" => Handle::WarpSource,
            "Curve" => Handle::Curve,
            _ => return None,
        })
    }
}

/// How a target-handle string was understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Named(Handle),
    /// `Inputs[i]`, or bare `Inputs` as index 0.
    Indexed(u32),
    Unrecognised,
}

pub fn classify_handle(handle: &str) -> HandleKind {
    if let Some(h) = Handle::parse(handle) {
        return HandleKind::Named(h);
    }
    if handle == "Inputs" {
        return HandleKind::Indexed(0);
    }
    handle
        .strip_prefix("Inputs[")
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|idx| idx.parse::<u32>().ok())
        .map(HandleKind::Indexed)
        .unwrap_or(HandleKind::Unrecognised)
}

/// Resolved inputs of one node: source node indices per slot.
#[derive(Debug, Clone, Default)]
pub struct ResolvedInputs {
    named: [Option<u32>; Handle::COUNT],
    /// `(array index, source node)` sorted by array index, unique indices.
    indexed: SmallVec<[(u32, u32); 4]>,
}

impl ResolvedInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect `source` to `kind`. A later connection to the same slot
    /// replaces the earlier one. Returns false for unrecognised handles.
    pub fn connect(&mut self, kind: HandleKind, source: usize) -> bool {
        let src = source as u32;
        match kind {
            HandleKind::Named(h) => {
                self.named[h as usize] = Some(src);
                true
            }
            HandleKind::Indexed(i) => {
                match self.indexed.binary_search_by_key(&i, |&(k, _)| k) {
                    Ok(pos) => self.indexed[pos].1 = src,
                    Err(pos) => self.indexed.insert(pos, (i, src)),
                }
                true
            }
            HandleKind::Unrecognised => false,
        }
    }

    #[inline]
    pub fn get(&self, handle: Handle) -> Option<usize> {
        self.named[handle as usize].map(|s| s as usize)
    }

    #[inline]
    pub fn has(&self, handle: Handle) -> bool {
        self.named[handle as usize].is_some()
    }

    /// Source connected to `Inputs[i]`.
    #[inline]
    pub fn at(&self, i: u32) -> Option<usize> {
        self.indexed
            .binary_search_by_key(&i, |&(k, _)| k)
            .ok()
            .map(|pos| self.indexed[pos].1 as usize)
    }

    /// All indexed sources in array order.
    pub fn indexed(&self) -> impl Iterator<Item = usize> + '_ {
        self.indexed.iter().map(|&(_, s)| s as usize)
    }

    pub fn indexed_len(&self) -> usize {
        self.indexed.len()
    }
}
