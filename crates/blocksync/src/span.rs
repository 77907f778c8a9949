use crate::MAX_HEADER_FETCH;

const MIN_SPAN: i128 = 2;
const MAX_SPAN: i128 = 16;

/// Parameters of a header range request towards a taller peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestSpan {
    /// First height to request (local height + 1).
    pub from: u64,
    /// Number of headers. Zero or negative means nothing to ask for.
    pub count: i64,
    /// Stride hint. Computed for logging only; requests go out with skip 0.
    pub skip: u64,
    /// `from + count`.
    pub max: u64,
}

impl RequestSpan {
    /// The request amount, or `None` when there is nothing to request.
    pub fn amount(&self) -> Option<u64> {
        (self.count > 0).then_some(self.count as u64)
    }
}

/// Work out which headers to ask a peer at `remote_height` for while the
/// local chain is at `local_height`.
///
/// Each side is lowered by one (floored at zero) before taking the distance,
/// so the two-apart case `local = 0, remote = 1` yields a count of zero.
pub fn calculate_request_span(remote_height: u64, local_height: u64) -> RequestSpan {
    // Heights span the whole u64 range, so the distance is taken in i128.
    let request_head = i128::from(remote_height.saturating_sub(1));
    let request_bottom = i128::from(local_height.saturating_sub(1));
    let total = request_head - request_bottom;
    let max_fetch = i128::from(MAX_HEADER_FETCH);

    let count = total.clamp(i128::from(i64::MIN), max_fetch) as i64;
    let span = (1 + total / max_fetch).clamp(MIN_SPAN, MAX_SPAN);
    let from = local_height.saturating_add(1);
    let max = (i128::from(from) + i128::from(count)).clamp(0, i128::from(u64::MAX)) as u64;

    RequestSpan {
        from,
        count,
        skip: (span - 1) as u64,
        max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_gap_is_capped() {
        let span = calculate_request_span(1000, 100);
        assert_eq!(
            span,
            RequestSpan {
                from: 101,
                count: 192,
                skip: 4,
                max: 293,
            }
        );
        assert_eq!(span.amount(), Some(192));
    }

    #[test]
    fn small_gap_uses_minimum_span() {
        let span = calculate_request_span(10, 5);
        assert_eq!(span.from, 6);
        assert_eq!(span.count, 5);
        assert_eq!(span.skip, 1);
        assert_eq!(span.max, 11);
    }

    #[test]
    fn span_is_clamped_at_sixteen() {
        let span = calculate_request_span(1_000_000, 0);
        assert_eq!(span.count, 192);
        assert_eq!(span.skip, 15);
    }

    #[test]
    fn no_request_when_not_behind() {
        assert_eq!(calculate_request_span(50, 50).amount(), None);
        assert_eq!(calculate_request_span(40, 50).count, -10);
        assert_eq!(calculate_request_span(40, 50).amount(), None);
    }

    #[test]
    fn genesis_next_to_height_one_requests_nothing() {
        let span = calculate_request_span(1, 0);
        assert_eq!(span.count, 0);
        assert_eq!(span.from, 1);
        assert_eq!(span.amount(), None);
    }

    #[test]
    fn from_genesis() {
        let span = calculate_request_span(5, 0);
        assert_eq!(span.from, 1);
        assert_eq!(span.count, 4);
        assert_eq!(span.max, 5);
    }

    #[test]
    fn heights_past_i64_range() {
        let span = calculate_request_span(1u64 << 63, 10);
        assert_eq!(
            span,
            RequestSpan {
                from: 11,
                count: 192,
                skip: 15,
                max: 203,
            }
        );

        let span = calculate_request_span(u64::MAX, 10);
        assert_eq!(span.amount(), Some(192));
        assert_eq!(span.skip, 15);
        assert_eq!(span.max, 203);
    }

    #[test]
    fn local_at_top_of_range() {
        let span = calculate_request_span(u64::MAX, u64::MAX);
        assert_eq!(span.from, u64::MAX);
        assert_eq!(span.amount(), None);

        let span = calculate_request_span(0, u64::MAX);
        assert_eq!(span.amount(), None);
        assert_eq!(span.count, i64::MIN);
        assert_eq!(span.max, i64::MAX as u64);
    }
}
