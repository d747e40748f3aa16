//! Byte pattern search strategies.
//!
//! All matchers return the offset of the first occurrence of the needle, so they can be swapped
//! freely. An empty needle matches at offset 0.

/// A strategy for locating a byte pattern inside a buffer.
pub trait Matcher {
    fn find(&self, haystack: &[u8], needle: &[u8]) -> Option<usize>;
}

/// Compares the needle at every position.
#[derive(Clone, Copy, Debug, Default)]
pub struct NaiveMatcher;

impl Matcher for NaiveMatcher {
    fn find(&self, haystack: &[u8], needle: &[u8]) -> Option<usize> {
        if needle.len() > haystack.len() {
            return None;
        }
        (0..=haystack.len() - needle.len()).find(|&start| &haystack[start..start + needle.len()] == needle)
    }
}

/// Knuth-Morris-Pratt search driven by a longest-proper-prefix table.
#[derive(Clone, Copy, Debug, Default)]
pub struct KmpMatcher;

impl KmpMatcher {
    fn prefix_table(needle: &[u8]) -> Vec<usize> {
        let mut table = vec![0; needle.len()];
        let mut len = 0;
        let mut i = 1;
        while i < needle.len() {
            if needle[i] == needle[len] {
                len += 1;
                table[i] = len;
                i += 1;
            } else if len != 0 {
                len = table[len - 1];
            } else {
                table[i] = 0;
                i += 1;
            }
        }
        table
    }
}

impl Matcher for KmpMatcher {
    fn find(&self, haystack: &[u8], needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        let table = Self::prefix_table(needle);
        let mut matched = 0;
        for (i, &byte) in haystack.iter().enumerate() {
            while matched > 0 && byte != needle[matched] {
                matched = table[matched - 1];
            }
            if byte == needle[matched] {
                matched += 1;
                if matched == needle.len() {
                    return Some(i + 1 - needle.len());
                }
            }
        }
        None
    }
}

/// Boyer-Moore variant by Sunday: the shift is taken from the byte just past the window.
#[derive(Clone, Copy, Debug, Default)]
pub struct SundayMatcher;

impl SundayMatcher {
    fn shift_table(needle: &[u8]) -> [usize; 256] {
        let m = needle.len();
        let mut table = [m + 1; 256];
        for (i, &byte) in needle.iter().enumerate() {
            table[byte as usize] = m - i;
        }
        table
    }
}

impl Matcher for SundayMatcher {
    fn find(&self, haystack: &[u8], needle: &[u8]) -> Option<usize> {
        let m = needle.len();
        let n = haystack.len();
        if m > n {
            return None;
        }
        let shift = Self::shift_table(needle);
        let mut start = 0;
        while start + m <= n {
            if &haystack[start..start + m] == needle {
                return Some(start);
            }
            match haystack.get(start + m) {
                Some(&next) => start += shift[next as usize],
                None => break,
            }
        }
        None
    }
}

/// Selects a matcher at configuration time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatcherKind {
    Naive,
    Kmp,
    #[default]
    Sunday,
}

impl Matcher for MatcherKind {
    fn find(&self, haystack: &[u8], needle: &[u8]) -> Option<usize> {
        match self {
            MatcherKind::Naive => NaiveMatcher.find(haystack, needle),
            MatcherKind::Kmp => KmpMatcher.find(haystack, needle),
            MatcherKind::Sunday => SundayMatcher.find(haystack, needle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [MatcherKind; 3] = [MatcherKind::Naive, MatcherKind::Kmp, MatcherKind::Sunday];

    #[test]
    fn finds_testcase() {
        let stream = b"there are a lot of testcases in the code we've developed.";
        for matcher in ALL {
            assert_eq!(matcher.find(stream, b"testcase"), Some(19), "{matcher:?}");
        }
    }

    #[test]
    fn missing_and_edge_patterns() {
        for matcher in ALL {
            assert_eq!(matcher.find(b"startxref", b"xrefs"), None);
            assert_eq!(matcher.find(b"abc", b"abcd"), None);
            assert_eq!(matcher.find(b"abc", b""), Some(0));
            assert_eq!(matcher.find(b"abc", b"abc"), Some(0));
            assert_eq!(matcher.find(b"aaab", b"aab"), Some(1));
            assert_eq!(matcher.find(b"endstreamendstream", b"endstream"), Some(0));
        }
    }

    #[test]
    fn matchers_agree_on_random_input() {
        // xorshift64
        let mut state = 0x2545_F491_4F6C_DD1D_u64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for _ in 0..2000 {
            let alphabet = 2 + (next() % 4) as u8;
            let len = (next() % 64) as usize;
            let haystack: Vec<u8> = (0..len).map(|_| b'a' + (next() % alphabet as u64) as u8).collect();
            let needle_len = 1 + (next() % 5) as usize;
            let needle: Vec<u8> = if !haystack.is_empty() && next() % 2 == 0 {
                let start = (next() as usize) % haystack.len();
                haystack[start..(start + needle_len).min(haystack.len())].to_vec()
            } else {
                (0..needle_len).map(|_| b'a' + (next() % alphabet as u64) as u8).collect()
            };

            let expected = NaiveMatcher.find(&haystack, &needle);
            assert_eq!(KmpMatcher.find(&haystack, &needle), expected, "{haystack:?} {needle:?}");
            assert_eq!(SundayMatcher.find(&haystack, &needle), expected, "{haystack:?} {needle:?}");
        }
    }
}
