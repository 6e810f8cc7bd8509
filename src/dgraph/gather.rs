//! Moving whole graphs between one process and a process group: gather to a
//! root, gather to everybody, and scatter from a root.

use serde::{Deserialize, Serialize};

use super::{DistGraph, LocalCsr, balanced_range};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{GnumReader, GnumWriter, decode_gnums, encode_gnums};
use crate::debug_invariants::DebugInvariants;
use crate::graph::{Gnum, Graph, gn};
use crate::graph_error::{CommResultExt, DgraphError, WireResultExt};

/// How `scatter` deals vertices out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    /// Contiguous slices whose sizes differ by at most one.
    #[default]
    Balanced,
    /// Every process but the last gets `per_process` vertices; the last gets the rest.
    Imbalanced { per_process: usize },
}

impl Distribution {
    /// Local vertex count of every process.
    pub fn counts(&self, n: usize, size: usize) -> Result<Vec<usize>, DgraphError> {
        match *self {
            Distribution::Balanced => Ok((0..size).map(|p| balanced_range(n, size, p).len()).collect()),
            Distribution::Imbalanced { per_process } => {
                let fixed = per_process
                    .checked_mul(size.saturating_sub(1))
                    .filter(|&f| per_process >= 1 && f <= n)
                    .ok_or_else(|| {
                        DgraphError::InvalidParameter(format!(
                            "cannot give {per_process} vertices to {} processes out of {n}",
                            size.saturating_sub(1)
                        ))
                    })?;
                let mut c = vec![per_process; size];
                if let Some(last) = c.last_mut() {
                    *last = n - fixed;
                }
                Ok(c)
            }
        }
    }
}

const FLAG_VLOAD: Gnum = 1;
const FLAG_ELOAD: Gnum = 2;
const FLAG_LABELS: Gnum = 4;

/// One shard in wire form: `[n, flags, degrees.., ends.., vloads.., eloads.., labels..]`.
pub(crate) struct Shard {
    pub(crate) degrees: Vec<Gnum>,
    pub(crate) ends: Vec<Gnum>,
    pub(crate) vloads: Option<Vec<Gnum>>,
    pub(crate) eloads: Option<Vec<Gnum>>,
    pub(crate) labels: Option<Vec<Gnum>>,
}

impl Shard {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut w = GnumWriter::with_capacity(2 + 2 * self.degrees.len() + 2 * self.ends.len());
        let flags = self.vloads.as_ref().map_or(0, |_| FLAG_VLOAD)
            | self.eloads.as_ref().map_or(0, |_| FLAG_ELOAD)
            | self.labels.as_ref().map_or(0, |_| FLAG_LABELS);
        w.put(gn(self.degrees.len()));
        w.put(flags);
        w.put_all(&self.degrees);
        w.put_all(&self.ends);
        for part in [&self.vloads, &self.eloads, &self.labels].into_iter().flatten() {
            w.put_all(part);
        }
        w.into_bytes()
    }

    pub(crate) fn decode(bytes: &[u8], op: &'static str) -> Result<Shard, DgraphError> {
        let mut r = GnumReader::new(bytes);
        let n = r.next_len().decoded(op)?;
        let flags = r.next_gnum().decoded(op)?;
        let mut degrees = Vec::new();
        r.read_into(n, &mut degrees).decoded(op)?;
        let arcs = degrees
            .iter()
            .try_fold(0usize, |a, &d| usize::try_from(d).ok().map(|d| a + d))
            .ok_or_else(|| DgraphError::internal(op, 90))?;
        let mut ends = Vec::new();
        r.read_into(arcs, &mut ends).decoded(op)?;
        let mut opt = |flag: Gnum, len: usize| -> Result<Option<Vec<Gnum>>, DgraphError> {
            if flags & flag == 0 {
                return Ok(None);
            }
            let mut v = Vec::new();
            r.read_into(len, &mut v).decoded(op)?;
            Ok(Some(v))
        };
        let vloads = opt(FLAG_VLOAD, n)?;
        let eloads = opt(FLAG_ELOAD, arcs)?;
        let labels = opt(FLAG_LABELS, n)?;
        Ok(Shard {
            degrees,
            ends,
            vloads,
            eloads,
            labels,
        })
    }
}

/// Concatenate shards into one compact local CSR. Missing loads default to
/// one, missing labels to the position in the concatenation.
pub(crate) fn concat(shards: Vec<Shard>) -> LocalCsr {
    let n: usize = shards.iter().map(|s| s.degrees.len()).sum();
    let any_vload = shards.iter().any(|s| s.vloads.is_some());
    let any_eload = shards.iter().any(|s| s.eloads.is_some());
    let any_labels = shards.iter().any(|s| s.labels.is_some());
    let mut vert_index = Vec::with_capacity(n + 1);
    vert_index.push(0);
    let mut edges = Vec::new();
    let mut vload = any_vload.then(Vec::new);
    let mut eload = any_eload.then(Vec::new);
    let mut labels = any_labels.then(Vec::new);
    for s in shards {
        let base = gn(vert_index.len() - 1);
        for &d in &s.degrees {
            let last = vert_index.last().copied().unwrap_or(0);
            vert_index.push(last + d as usize);
        }
        if let Some(el) = eload.as_mut() {
            match &s.eloads {
                Some(l) => el.extend_from_slice(l),
                None => el.extend(std::iter::repeat_n(1, s.ends.len())),
            }
        }
        edges.extend(s.ends);
        let local = s.degrees.len();
        if let Some(vl) = vload.as_mut() {
            match s.vloads {
                Some(l) => vl.extend(l),
                None => vl.extend(std::iter::repeat_n(1, local)),
            }
        }
        if let Some(lb) = labels.as_mut() {
            match s.labels {
                Some(l) => lb.extend(l),
                None => lb.extend((0..local).map(|i| base + gn(i))),
            }
        }
    }
    let mut csr = LocalCsr::compact(&vert_index, edges, vload, eload);
    csr.labels = labels;
    csr
}

/// Centralized graph from a compact CSR whose ends are already local numbers.
pub(crate) fn csr_into_graph(csr: LocalCsr) -> Result<Graph, DgraphError> {
    let mut vert_index = csr.vert_start;
    vert_index.push(csr.arc_count);
    let g = Graph::new(vert_index, csr.edges, csr.vert_load, csr.edge_load)?;
    let g = match csr.labels {
        Some(l) => g.with_labels(l)?,
        None => g,
    };
    g.debug_assert_invariants();
    Ok(g)
}

fn assemble(shards: Vec<Shard>) -> Result<Graph, DgraphError> {
    csr_into_graph(concat(shards))
}

impl<C: Communicator> DistGraph<C> {
    fn shard(&self) -> Shard {
        let csr = self.to_local_csr();
        Shard {
            degrees: (0..self.vertex_count()).map(|v| gn(self.degree(v))).collect(),
            ends: csr.edges,
            vloads: csr.vert_load,
            eloads: csr.edge_load,
            labels: csr.labels,
        }
    }

    /// Collective: centralized copy of the whole graph on `root` (vertices
    /// numbered by their global numbers); `None` elsewhere.
    pub fn gather(&self, root: usize) -> Result<Option<Graph>, DgraphError> {
        const OP: &str = "dgraph_gather";
        let Some(all) = self.comm().gather(root, &self.shard().encode()).at(OP, 1)? else {
            return Ok(None);
        };
        let shards = all
            .iter()
            .map(|b| Shard::decode(b, OP))
            .collect::<Result<Vec<_>, _>>()?;
        assemble(shards).map(Some)
    }

    /// Collective: centralized copy of the whole graph on every process.
    pub fn gather_all(&self) -> Result<Graph, DgraphError> {
        const OP: &str = "dgraph_gather_all";
        let all = self.comm().allgather(&self.shard().encode()).at(OP, 1)?;
        let shards = all
            .iter()
            .map(|b| Shard::decode(b, OP))
            .collect::<Result<Vec<_>, _>>()?;
        assemble(shards)
    }
}

/// Collective: distribute `graph`, held by `root`, over `comm`.
///
/// Non-root processes pass `None`. Vertex `v` of `graph` becomes global
/// vertex `v`; labels are carried when present.
pub fn scatter<C: Communicator>(
    comm: C,
    root: usize,
    graph: Option<&Graph>,
    dist: Distribution,
) -> Result<DistGraph<C>, DgraphError> {
    const OP: &str = "dgraph_scatter";
    let me = comm.rank();
    let size = comm.size();
    let header = if me == root {
        graph.map_or(-1, |g| gn(g.vertex_count()))
    } else {
        0
    };
    let header = decode_gnums(&comm.broadcast(root, &encode_gnums(&[header])).at(OP, 1)?).decoded(OP)?;
    let n = header
        .first()
        .copied()
        .and_then(|h| usize::try_from(h).ok())
        .ok_or_else(|| DgraphError::InvalidParameter("scatter root holds no graph".into()))?;
    let counts = dist.counts(n, size)?;

    let mine = if me == root {
        let g = graph.ok_or_else(|| DgraphError::internal(OP, 2))?;
        let mut start = 0;
        let mut own = Vec::new();
        for (p, &c) in counts.iter().enumerate() {
            let range = start..start + c;
            start += c;
            let shard = Shard {
                degrees: range.clone().map(|v| gn(g.degree(v))).collect(),
                ends: g.edges[g.vert_index[range.start]..g.vert_index[range.end]].to_vec(),
                vloads: g.vert_load.as_ref().map(|l| l[range.clone()].to_vec()),
                eloads: g
                    .edge_load
                    .as_ref()
                    .map(|l| l[g.vert_index[range.start]..g.vert_index[range.end]].to_vec()),
                labels: g.labels.as_ref().map(|l| l[range.clone()].to_vec()),
            }
            .encode();
            if p == root {
                own = shard;
            } else {
                comm.send(p, CommTag::SCATTER, &shard).at(OP, 3)?;
            }
        }
        own
    } else {
        comm.recv(root, CommTag::SCATTER).at(OP, 4)?
    };
    let csr = concat(vec![Shard::decode(&mine, OP)?]);
    DistGraph::build(comm, csr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::ThreadComm;
    use crate::graph::grid::build_grid_3d;

    #[test]
    fn imbalanced_counts() {
        let d = Distribution::Imbalanced { per_process: 2 };
        assert_eq!(d.counts(10, 3).unwrap(), vec![2, 2, 6]);
        assert!(d.counts(3, 3).is_err());
        assert_eq!(Distribution::Balanced.counts(5, 2).unwrap(), vec![3, 2]);
    }

    #[test]
    fn scatter_then_gather_is_identity() {
        let out = ThreadComm::run(3, |comm| {
            let full = build_grid_3d(3, 2, 2).unwrap();
            let g = scatter(comm, 1, Some(&full), Distribution::Imbalanced { per_process: 3 }).unwrap();
            g.check().unwrap();
            let back = g.gather(0).unwrap();
            let all = g.gather_all().unwrap();
            (g.vertex_count(), back.map(|b| b == full), all == full)
        });
        assert_eq!(out.iter().map(|o| o.0).collect::<Vec<_>>(), vec![3, 3, 6]);
        assert_eq!(out[0].1, Some(true));
        assert!(out.iter().all(|o| o.2));
    }
}
