//! CK-004: Dependency graph checks and generation ordering.
//!
//! The planner-supplied `generationOrder` is the execution order. This module
//! only rejects manifests that could never complete (unknown or self
//! dependencies, duplicate ids, cycles) and reports order inversions.

use super::types::{ChunkDefinition, Manifest};
use std::collections::{HashMap, HashSet, VecDeque};

/// Structural problems that make a manifest unplannable.
pub fn validate_manifest(manifest: &Manifest) -> Vec<String> {
    let mut errors = Vec::new();

    if manifest.chunks.is_empty() {
        errors.push("manifest has no chunks".to_string());
        return errors;
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for chunk in &manifest.chunks {
        if chunk.chunk_id.trim().is_empty() {
            errors.push("chunk with empty chunkId".to_string());
        }
        if !seen.insert(chunk.chunk_id.as_str()) {
            errors.push(format!("duplicate chunkId '{}'", chunk.chunk_id));
        }
    }

    for chunk in &manifest.chunks {
        for dep in &chunk.dependencies {
            if dep == &chunk.chunk_id {
                errors.push(format!("chunk '{}' depends on itself", chunk.chunk_id));
            } else if !seen.contains(dep.as_str()) {
                errors.push(format!(
                    "chunk '{}' depends on unknown '{}'",
                    chunk.chunk_id, dep
                ));
            }
        }
    }

    for id in &manifest.generation_order {
        if !seen.contains(id.as_str()) {
            errors.push(format!("generationOrder names unknown chunk '{}'", id));
        }
    }

    if errors.is_empty() {
        if let Err(e) = topological_order(&manifest.chunks) {
            errors.push(e);
        }
    }

    errors
}

/// Kahn's algorithm over chunk dependencies, declaration-order tie-breaking.
/// Only used to prove acyclicity; execution follows `generation_order`.
pub fn topological_order(chunks: &[ChunkDefinition]) -> Result<Vec<String>, String> {
    let index: HashMap<&str, usize> = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| (c.chunk_id.as_str(), i))
        .collect();
    let mut in_degree = vec![0usize; chunks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); chunks.len()];

    for (i, chunk) in chunks.iter().enumerate() {
        for dep in &chunk.dependencies {
            let Some(&d) = index.get(dep.as_str()) else {
                return Err(format!(
                    "chunk '{}' depends on unknown '{}'",
                    chunk.chunk_id, dep
                ));
            };
            dependents[d].push(i);
            in_degree[i] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..chunks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(chunks.len());
    while let Some(current) = queue.pop_front() {
        order.push(chunks[current].chunk_id.clone());
        let mut next_ready: Vec<usize> = Vec::new();
        for &n in &dependents[current] {
            in_degree[n] -= 1;
            if in_degree[n] == 0 {
                next_ready.push(n);
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != chunks.len() {
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        let cycle_members: Vec<&str> = chunks
            .iter()
            .map(|c| c.chunk_id.as_str())
            .filter(|id| !ordered.contains(id))
            .collect();
        return Err(format!(
            "dependency cycle detected involving: {}",
            cycle_members.join(", ")
        ));
    }

    Ok(order)
}

/// Chunks scheduled no later than one of their dependencies.
/// Returns (chunk, dependency) pairs.
pub fn order_inversions(chunks: &[ChunkDefinition]) -> Vec<(String, String)> {
    let orders: HashMap<&str, i64> = chunks
        .iter()
        .map(|c| (c.chunk_id.as_str(), c.generation_order))
        .collect();
    let mut inversions = Vec::new();
    for chunk in chunks {
        for dep in &chunk.dependencies {
            if let Some(&dep_order) = orders.get(dep.as_str()) {
                if dep_order >= chunk.generation_order {
                    inversions.push((chunk.chunk_id.clone(), dep.clone()));
                }
            }
        }
    }
    inversions
}

/// Chunk ids in execution order: `generation_order`, then declaration order.
pub fn generation_sequence(chunks: &[ChunkDefinition]) -> Vec<String> {
    let mut indexed: Vec<(usize, &ChunkDefinition)> = chunks.iter().enumerate().collect();
    indexed.sort_by_key(|(i, c)| (c.generation_order, *i));
    indexed.into_iter().map(|(_, c)| c.chunk_id.clone()).collect()
}
