//! Natural ("file2 before file10") ordering for display names.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

/// Compares two names treating embedded digit runs by numeric value and
/// letters case-insensitively. Names equal under those rules fall back to a
/// plain comparison so the order stays total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_run = take_digits(&mut left);
                let r_run = take_digits(&mut right);
                match compare_digit_runs(&l_run, &r_run) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            (Some(l), Some(r)) => {
                left.next();
                right.next();
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Sorts `items` in place by the natural order of the key.
pub fn sort_natural_by_key<T, F>(items: &mut [T], mut key: F)
where
    F: FnMut(&T) -> &str,
{
    items.sort_by(|a, b| natural_cmp(key(a), key(b)));
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
        // "01" after "1" so equal values still order deterministically
        .then_with(|| a.len().cmp(&b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut names: Vec<&str>) -> Vec<&str> {
        names.sort_by(|a, b| natural_cmp(a, b));
        names
    }

    #[test]
    fn numbers_compare_by_value() {
        assert_eq!(
            sorted(vec!["file10", "file2", "file1"]),
            vec!["file1", "file2", "file10"]
        );
        assert_eq!(sorted(vec!["10", "2", "1"]), vec!["1", "2", "10"]);
    }

    #[test]
    fn letters_ignore_case() {
        assert_eq!(sorted(vec!["b", "A", "a", "C"]), vec!["A", "a", "b", "C"]);
    }

    #[test]
    fn leading_zeros_and_long_runs() {
        assert_eq!(natural_cmp("img01", "img1"), Ordering::Greater);
        assert_eq!(natural_cmp("img007", "img7"), Ordering::Greater);
        assert_eq!(
            natural_cmp("x99999999999999999999999", "x100000000000000000000000"),
            Ordering::Less
        );
    }

    #[test]
    fn prefixes_sort_first() {
        assert_eq!(natural_cmp("abc", "abc1"), Ordering::Less);
        assert_eq!(natural_cmp("abc", "abc"), Ordering::Equal);
    }

    #[test]
    fn sort_by_key_helper() {
        let mut items = vec![("Season 10", 1), ("Season 9", 2)];
        sort_natural_by_key(&mut items, |item| item.0);
        assert_eq!(items[0].0, "Season 9");
    }
}
