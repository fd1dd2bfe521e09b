use rand::Rng;
use rand::seq::SliceRandom;

use crate::paths::Paths;

const EFF_WORDLIST_URL: &str = "https://www.eff.org/files/2016/09/08/eff_short_wordlist_1.txt";
const DICT_WORDS_PATH: &str = "/usr/share/dict/words";

/// Generates candidate environment name suffixes, trying progressively
/// less pleasant sources until one works. Used by `cubicle tmp` to pick a
/// free `tmp-<word>` name without the caller having to think of one.
///
/// 1. The EFF short word list (cached on disk, downloaded on first use).
/// 2. The system dictionary, if present.
/// 3. Twenty random six-letter strings.
/// 4. One random thirty-two-letter string, which is assumed to never collide.
pub struct RandomNameGenerator<'a> {
    paths: &'a Paths,
}

impl<'a> RandomNameGenerator<'a> {
    pub fn new(paths: &'a Paths) -> Self {
        Self { paths }
    }

    /// Returns candidate words in the order they should be tried. Each is
    /// guaranteed lowercase-alphabetic, but callers must still check that
    /// `tmp-<word>` isn't already in use.
    pub fn candidates(&self) -> Vec<String> {
        let mut candidates = Vec::new();
        let mut rng = rand::thread_rng();

        if let Some(words) = self.eff_wordlist() {
            for _ in 0..200 {
                let Some(line) = words.choose(&mut rng) else {
                    break;
                };
                if let Some(word) = line.split_whitespace().nth(1) {
                    if is_usable(word, 10) {
                        candidates.push(word.to_owned());
                    }
                }
            }
        }

        if let Ok(contents) = std::fs::read_to_string(DICT_WORDS_PATH) {
            let lines: Vec<&str> = contents.lines().collect();
            for _ in 0..200 {
                let Some(word) = lines.choose(&mut rng) else {
                    break;
                };
                let word = word.trim();
                if is_usable(word, 6) {
                    candidates.push(word.to_owned());
                }
            }
        }

        for _ in 0..20 {
            candidates.push(random_lowercase(&mut rng, 6));
        }
        candidates.push(random_lowercase(&mut rng, 32));

        candidates
    }

    fn eff_wordlist(&self) -> Option<Vec<String>> {
        let cache_path = self.paths.eff_wordlist_cache();
        if let Ok(contents) = std::fs::read_to_string(cache_path.as_path()) {
            return Some(contents.lines().map(str::to_owned).collect());
        }

        let response = match reqwest::blocking::get(EFF_WORDLIST_URL) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "failed to download EFF word list, falling back");
                return None;
            }
        };
        let contents = match response.text() {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read EFF word list response, falling back");
                return None;
            }
        };
        if let Some(parent) = cache_path.as_path().parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(cache_path.as_path(), &contents);
        Some(contents.lines().map(str::to_owned).collect())
    }
}

fn is_usable(word: &str, max_len: usize) -> bool {
    !word.is_empty()
        && word.len() <= max_len
        && word.chars().all(|c| c.is_ascii_lowercase())
}

fn random_lowercase(rng: &mut impl Rng, len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_random_letters_with_no_wordlists_available() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths {
            home_dirs: cubicle_core::HostPath::new(dir.path()),
            work_dirs: cubicle_core::HostPath::new(dir.path()),
            package_cache: cubicle_core::HostPath::new(dir.path()),
            user_package_dir: cubicle_core::HostPath::new(dir.path()),
            code_package_dir: cubicle_core::HostPath::new(dir.path()),
            script_dir: cubicle_core::HostPath::new(dir.path()),
            cache_dir: cubicle_core::HostPath::new(dir.path().join("does-not-exist")),
        };
        let generator = RandomNameGenerator::new(&paths);
        let candidates = generator.candidates();
        // Tier 1/2 may or may not contribute depending on the host's
        // /usr/share/dict/words, but tiers 3 and 4 always do.
        assert!(candidates.len() >= 21);
        assert!(candidates.iter().all(|w| is_usable(w, 32)));
    }

    #[test]
    fn random_lowercase_has_requested_length_and_alphabet() {
        let mut rng = rand::thread_rng();
        let word = random_lowercase(&mut rng, 32);
        assert_eq!(word.len(), 32);
        assert!(word.chars().all(|c| c.is_ascii_lowercase()));
    }
}
