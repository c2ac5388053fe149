// Turns a person's accumulated keystrokes into fixed-size training samples.

/// One labeled training sample: a chunk of keystrokes and who typed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub text: String,
    pub label: String,
}

/// Split `mash` into `floor(len / size)` non-overlapping chunks of exactly
/// `size` characters, taken from the start in order. Trailing characters that
/// do not fill a whole chunk are dropped.
///
/// Lengths are counted in `char`s, so multi-byte keystrokes are never split.
pub fn chunk(mash: &str, size: usize) -> Vec<String> {
    if size == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = mash.chars().collect();
    chars
        .chunks_exact(size)
        .map(|c| c.iter().collect())
        .collect()
}

/// [`chunk`] each piece of `mash` and label it with `person_id`.
pub fn labeled_chunks(person_id: &str, mash: &str, size: usize) -> Vec<Sample> {
    chunk(mash, size)
        .into_iter()
        .map(|text| Sample {
            text,
            label: person_id.to_string(),
        })
        .collect()
}
