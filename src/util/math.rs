//! Integer and rounding helpers for transform planning and overlap counts.

/// Returns the largest prime factor of `n` (1 for `n <= 1`).
pub(crate) fn greatest_prime_factor(mut n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    let mut largest = 1;
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            largest = p;
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        largest = largest.max(n);
    }
    largest
}

/// Returns the smallest `n >= min_len` whose prime factors are all `<= max_prime`.
pub(crate) fn next_smooth_size(min_len: usize, max_prime: usize) -> usize {
    let max_prime = max_prime.max(2);
    let mut n = min_len.max(1);
    while greatest_prime_factor(n) > max_prime {
        n += 1;
    }
    n
}

/// Computes `ceil(fraction * count)`, snapping products within `1e-9` of an
/// integer onto that integer.
pub(crate) fn ceil_fraction_of(fraction: f64, count: u64) -> u64 {
    let product = fraction * count as f64;
    if product <= 0.0 {
        return 0;
    }
    let nearest = product.round();
    if (product - nearest).abs() <= 1e-9 {
        nearest as u64
    } else {
        product.ceil() as u64
    }
}
