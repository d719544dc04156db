//! Pairwise discrepancy grids and target clustering
//!
//! A grid records, for one stream, how every pair of targets compared. Two
//! streams with the same normalized grid exercise the same disagreement, so
//! grids serve as the novelty key while exploring.

use crate::diff::{classify, stream_is_invalid, Discrepancy, StatusCause};
use crate::message::HttpMessage;
use crate::target::Service;

/// Square matrix over targets. Only cells above the diagonal are filled;
/// use [`Grid::pair`] to look a pair up in either order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Grid<T>(pub Vec<Vec<Option<T>>>);

impl<T> Grid<T> {
    /// Number of targets along each side
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// The raw cell at row `i`, column `j`
    pub fn get(&self, i: usize, j: usize) -> Option<&T> {
        self.0.get(i)?.get(j)?.as_ref()
    }

    /// The outcome for targets `i` and `j`, whichever order they are given in
    pub fn pair(&self, i: usize, j: usize) -> Option<&T> {
        if i <= j { self.get(i, j) } else { self.get(j, i) }
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Grid<U> {
        Grid(
            self.0
                .iter()
                .map(|row| row.iter().map(|cell| cell.as_ref().map(&mut f)).collect())
                .collect(),
        )
    }
}

/// Coarse outcome kept in normalized grids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Agree,
    Disagree,
}

/// Compare every pair of targets on one stream. `replies[i]` belongs to
/// `services[i]`.
pub fn generate_grid(replies: &[Vec<HttpMessage>], services: &[Service]) -> Grid<Discrepancy> {
    let n = replies.len().min(services.len());
    let mut cells = vec![vec![None; n]; n];
    for i in 0..n {
        for j in i + 1..n {
            cells[i][j] = Some(classify(
                &replies[i],
                &replies[j],
                &services[i].anomalies,
                &services[j].anomalies,
            ));
        }
    }
    Grid(cells)
}

/// Collapse a grid to agree/disagree. Two targets rejecting with different
/// codes count as agreeing: both refused the stream.
pub fn normalize_grid(grid: &Grid<Discrepancy>) -> Grid<Verdict> {
    grid.map(|discrepancy| match discrepancy {
        Discrepancy::NoDiscrepancy | Discrepancy::Status(StatusCause::DifferentStatus) => {
            Verdict::Agree
        },
        _ => Verdict::Disagree,
    })
}

/// Group targets that parsed the stream identically. Targets that all
/// produced invalid output share a cluster too. Each cluster lists indices
/// into `services`, in ascending order.
pub fn generate_clusters(replies: &[Vec<HttpMessage>], services: &[Service]) -> Vec<Vec<usize>> {
    let grid = generate_grid(replies, services);
    let invalid: Vec<bool> = replies
        .iter()
        .take(grid.size())
        .map(|r| stream_is_invalid(r) || r.iter().any(|m| !m.is_valid()))
        .collect();

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for target in 0..grid.size() {
        let home = clusters.iter_mut().find(|cluster| {
            cluster.iter().all(|&member| {
                (invalid[member] && invalid[target])
                    || grid.pair(member, target) == Some(&Discrepancy::NoDiscrepancy)
            })
        });
        match home {
            Some(cluster) => cluster.push(target),
            None => clusters.push(vec![target]),
        }
    }
    clusters
}
