//! Redis `KEYS`/`SCAN MATCH` style glob matching.
//!
//! Supported: `*`, `?`, `[abc]`, `[a-z]`, `[^x]` / `[!x]`, and `\` escapes.

/// Whether `text` matches `pattern` in full.
pub fn matches(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    // Where to resume after the most recent `*`: (pattern index after star, text index).
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        match p.get(pi) {
            Some('*') => {
                star = Some((pi + 1, ti));
                pi += 1;
                continue;
            }
            Some(_) => {
                if let Some(next) = step(&p, pi, t[ti]) {
                    pi = next;
                    ti += 1;
                    continue;
                }
            }
            None => {}
        }
        match star {
            Some((sp, st)) => {
                pi = sp;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

/// Try to match one text char at pattern position `pi` (not a `*`).
/// Returns the pattern index after the consumed token.
fn step(p: &[char], pi: usize, c: char) -> Option<usize> {
    match p[pi] {
        '?' => Some(pi + 1),
        '\\' if pi + 1 < p.len() => (p[pi + 1] == c).then_some(pi + 2),
        '[' => class(p, pi, c),
        lit => (lit == c).then_some(pi + 1),
    }
}

fn class(p: &[char], pi: usize, c: char) -> Option<usize> {
    let mut i = pi + 1;
    let negate = matches!(p.get(i), Some('^' | '!'));
    if negate {
        i += 1;
    }
    let mut hit = false;
    let mut first = true;
    loop {
        let ch = *p.get(i)?;
        if ch == ']' && !first {
            break;
        }
        first = false;
        if ch == '\\' && i + 1 < p.len() {
            hit |= p[i + 1] == c;
            i += 2;
        } else if p.get(i + 1) == Some(&'-') && p.get(i + 2).is_some_and(|e| *e != ']') {
            let (lo, hi) = (ch.min(p[i + 2]), ch.max(p[i + 2]));
            hit |= (lo..=hi).contains(&c);
            i += 3;
        } else {
            hit |= ch == c;
            i += 1;
        }
    }
    (hit != negate).then_some(i + 1)
}
