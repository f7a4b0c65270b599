//! `MapReduce`: partition every table-valued input into `P` slices, run a
//! clone of an inner `ObjectTransform` over each matching set of slices
//! independently, then union the per-partition outputs back into the
//! declared outputs.
//!
//! Grounded in the fan-out-by-row-range / fan-in-by-union shape of the
//! original's manual partitioning helper: add a deterministic partition
//! column with `row_number()` to each input, slice on it, clone the mapper
//! once per partition (each clone reading the same partition index across
//! every input), then `UNION ALL` the slices back together per output.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::Int64Type;
use arrow_array::BooleanArray;
use arrow_select::filter::filter_record_batch;
use async_trait::async_trait;

use batchflow_core::{ArtifactId, ContractError, ExecOptions, SentinelFn, Task};
use batchflow_storage::{FileSystem, RawTableStorage, Rdb, Table};

use crate::group::{drop_owned, Group};
use crate::object_task::{ObjectTaskNode, ObjectTransform};
use crate::sql_task::{SqlTaskNode, SqlTransform};

const ROW_ID_COL: &str = "__row_id";
const PARTITION_COL: &str = "__partition";

/// Adds `row_number() OVER () - 1 AS __row_id` and `__row_id % P AS
/// __partition` to the input table. Row-number ordering is whatever the
/// backend returns it in; callers that need a specific partition
/// assignment should pre-sort the input.
struct AddPartitionKeyTransform {
    input_id: ArtifactId,
    partitions: usize,
}

#[async_trait]
impl SqlTransform for AddPartitionKeyTransform {
    async fn sqls(&self, _opts: &ExecOptions) -> anyhow::Result<HashMap<String, String>> {
        let select = format!(
            "SELECT *, (row_number() OVER () - 1) AS {row}, \
             (row_number() OVER () - 1) % {p} AS {part} FROM {input}",
            row = ROW_ID_COL,
            part = PARTITION_COL,
            p = self.partitions as i64,
            input = self.input_id,
        );
        Ok(HashMap::from([(partitioned_id(&self.input_id), select)]))
    }
}

/// Splits the partition-keyed table into `P` slices by `__partition`,
/// dropping the two bookkeeping columns. Every slice must receive at
/// least one row: a degenerate split would silently drop a mapper clone's
/// share of the work.
#[derive(Clone)]
struct DivideTransform {
    partitions: usize,
}

#[async_trait]
impl ObjectTransform for DivideTransform {
    type Input = Table;
    type Output = Table;

    async fn transform(
        &self,
        inputs: Vec<Table>,
        _opts: &ExecOptions,
    ) -> anyhow::Result<Vec<Table>> {
        let table = inputs
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Divide expects exactly one input table"))?;

        let mut slices: Vec<Table> = vec![Vec::new(); self.partitions];

        for batch in &table {
            let schema = batch.schema();
            let partition_idx = schema
                .index_of(PARTITION_COL)
                .map_err(|e| anyhow::anyhow!("partitioned table missing {PARTITION_COL:?}: {e}"))?;
            let row_id_idx = schema
                .index_of(ROW_ID_COL)
                .map_err(|e| anyhow::anyhow!("partitioned table missing {ROW_ID_COL:?}: {e}"))?;

            let keep: Vec<usize> = (0..batch.num_columns())
                .filter(|&i| i != partition_idx && i != row_id_idx)
                .collect();

            let partition_col = batch.column(partition_idx).as_primitive::<Int64Type>();

            for (k, slice) in slices.iter_mut().enumerate() {
                let mask = BooleanArray::from_iter(
                    partition_col.iter().map(|v| v.map(|x| x == k as i64)),
                );
                let filtered = filter_record_batch(batch, &mask)
                    .map_err(|e| anyhow::anyhow!("filtering partition {k}: {e}"))?;
                if filtered.num_rows() == 0 {
                    continue;
                }
                let projected = filtered
                    .project(&keep)
                    .map_err(|e| anyhow::anyhow!("projecting partition {k}: {e}"))?;
                slice.push(projected);
            }
        }

        for (k, slice) in slices.iter().enumerate() {
            if slice.is_empty() {
                anyhow::bail!("partition {k} of {} received zero rows", self.partitions);
            }
        }

        Ok(slices)
    }
}

/// Unions the `P` per-partition results for one declared output back into
/// a single table.
struct MergeTransform {
    output_id: ArtifactId,
    part_ids: Vec<ArtifactId>,
}

#[async_trait]
impl SqlTransform for MergeTransform {
    async fn sqls(&self, _opts: &ExecOptions) -> anyhow::Result<HashMap<String, String>> {
        let union = self
            .part_ids
            .iter()
            .map(|id| format!("SELECT * FROM {id}"))
            .collect::<Vec<_>>()
            .join(" UNION ALL ");
        Ok(HashMap::from([(self.output_id.clone(), union)]))
    }
}

fn partitioned_id(input_id: &str) -> ArtifactId {
    format!("{input_id}_partitioned")
}

fn part_id(input_id: &str, k: usize) -> ArtifactId {
    format!("{input_id}_part{k}")
}

fn output_part_id(output_id: &str, k: usize) -> ArtifactId {
    format!("{output_id}_part{k}")
}

/// Builds the `Group` implementing the map/reduce fan-out over `mapper`.
///
/// `mapper` runs once per partition; clone `k` consumes the `k`-th
/// partition of every entry in `input_ids` (in the same order) and
/// produces one table per entry in `output_ids`; the per-partition results
/// for each output are unioned back together.
pub struct MapReduce;

impl MapReduce {
    #[allow(clippy::too_many_arguments)]
    pub fn build<R, F, M>(
        name: impl Into<String>,
        input_ids: Vec<ArtifactId>,
        output_ids: Vec<ArtifactId>,
        external_input_ids: Vec<ArtifactId>,
        mapper: M,
        fs: Arc<F>,
        partitions: usize,
    ) -> Result<Group, ContractError>
    where
        R: Rdb + Default + 'static,
        F: FileSystem + 'static,
        M: ObjectTransform<Input = Table, Output = Table> + Clone + 'static,
    {
        assert!(partitions >= 1, "MapReduce requires at least one partition");
        assert!(
            !input_ids.is_empty(),
            "MapReduce requires at least one input identifier"
        );

        let name = name.into();
        let mut children: Vec<Arc<dyn Task>> = Vec::new();

        let as_dyn_fs = |fs: &Arc<F>| -> Arc<dyn FileSystem> { fs.clone() };

        // One AddPartitionKey + Divide pair per input identifier; each
        // Divide yields that input's P per-partition slices.
        let mut part_ids_by_input: Vec<Vec<ArtifactId>> = Vec::with_capacity(input_ids.len());
        for input_id in &input_ids {
            let partitioned = partitioned_id(input_id);

            let add_partition_key: SqlTaskNode<R, _> = SqlTaskNode::new(
                format!("{name}.add_partition_key.{input_id}"),
                vec![input_id.clone()],
                vec![partitioned.clone()],
                vec![input_id.clone()],
                AddPartitionKeyTransform {
                    input_id: input_id.clone(),
                    partitions,
                },
                Some(as_dyn_fs(&fs)),
                Some(as_dyn_fs(&fs)),
            )?;
            children.push(Arc::new(add_partition_key));

            let part_ids: Vec<ArtifactId> =
                (0..partitions).map(|k| part_id(input_id, k)).collect();
            let divide: ObjectTaskNode<_, RawTableStorage<F>, RawTableStorage<F>> =
                ObjectTaskNode::new(
                    format!("{name}.divide.{input_id}"),
                    vec![partitioned.clone()],
                    part_ids.clone(),
                    vec![],
                    DivideTransform { partitions },
                    Arc::new(RawTableStorage::new(fs.clone())),
                    Arc::new(RawTableStorage::new(fs.clone())),
                )?;
            children.push(Arc::new(divide));

            part_ids_by_input.push(part_ids);
        }

        // Maps each declared output to its P per-partition identifiers, so
        // the merge stage below can look them up by output once the loop
        // over partitions has created every mapper clone.
        let mut parts_by_output: Vec<Vec<ArtifactId>> =
            vec![Vec::with_capacity(partitions); output_ids.len()];

        for k in 0..partitions {
            let clone_input_ids: Vec<ArtifactId> = part_ids_by_input
                .iter()
                .map(|parts| parts[k].clone())
                .collect();
            let clone_output_ids: Vec<ArtifactId> = output_ids
                .iter()
                .map(|o| output_part_id(o, k))
                .collect();
            for (o_idx, id) in clone_output_ids.iter().enumerate() {
                parts_by_output[o_idx].push(id.clone());
            }

            let clone: ObjectTaskNode<M, RawTableStorage<F>, RawTableStorage<F>> = ObjectTaskNode::new(
                format!("{name}.map_{k}"),
                clone_input_ids,
                clone_output_ids,
                vec![],
                mapper.clone(),
                Arc::new(RawTableStorage::new(fs.clone())),
                Arc::new(RawTableStorage::new(fs.clone())),
            )?;
            children.push(Arc::new(clone));
        }

        for (output_id, part_ids) in output_ids.iter().zip(parts_by_output.into_iter()) {
            let merge: SqlTaskNode<R, _> = SqlTaskNode::new(
                format!("{name}.merge.{output_id}"),
                part_ids.clone(),
                vec![output_id.clone()],
                vec![],
                MergeTransform {
                    output_id: output_id.clone(),
                    part_ids,
                },
                Some(as_dyn_fs(&fs)),
                Some(as_dyn_fs(&fs)),
            )?;
            children.push(Arc::new(merge));
        }

        // The group these children are about to be wrapped in doesn't exist
        // yet, so `end` can't call a `Group` instance method; it drives the
        // same owning-child lookup `Group::drop_internal_objs` uses, over a
        // clone of the children list and the full set of internal
        // identifiers (every partitioned table and per-partition slice).
        let cleanup_children = children.clone();
        let cleanup_ids: Vec<ArtifactId> = {
            let mut ids: Vec<ArtifactId> =
                input_ids.iter().map(|id| partitioned_id(id)).collect();
            for parts in &part_ids_by_input {
                ids.extend(parts.iter().cloned());
            }
            for k in 0..partitions {
                for output_id in &output_ids {
                    ids.push(output_part_id(output_id, k));
                }
            }
            ids
        };
        let on_end = SentinelFn::new(format!("{name}.cleanup"), move |opts| {
            let children = cleanup_children.clone();
            let ids = cleanup_ids.clone();
            async move {
                drop_owned(&children, &ids, &opts).await;
                Ok::<(), batchflow_core::TaskError>(())
            }
        });

        Group::with_hooks(
            name,
            input_ids,
            output_ids,
            external_input_ids,
            children,
            None,
            Some(on_end),
        )
    }
}
