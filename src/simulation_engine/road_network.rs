//! Road table loader and the lane graph built from it.
//!
//! Segments, lanes and junctions live in arenas and refer to each other by
//! index, so cyclic layouts (roundabouts, loops) need no shared ownership.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::config::SimConfig;
use crate::error::FormatError;
use crate::shared_data::{Bounds, RoadGeometry, SegmentVisual};
use crate::simulation_engine::intersections::{
    Junction, JunctionControl, JunctionId, JunctionPolicy,
};
use crate::simulation_engine::lanes::{
    heading_deviation, Direction, Lane, LaneId, LaneKey, Point, Polyline, Pose,
};

const TABLE: &str = "road";

#[derive(Debug, Deserialize)]
struct RoadRow {
    id: String,
    #[serde(default)]
    geometry: Option<String>,
    #[serde(default)]
    x1: Option<f64>,
    #[serde(default)]
    y1: Option<f64>,
    #[serde(default)]
    x2: Option<f64>,
    #[serde(default)]
    y2: Option<f64>,
    lane_count: i64,
    speed_limit: f64,
    #[serde(default)]
    oneway: Option<String>,
    #[serde(default)]
    successors: Option<String>,
    #[serde(default)]
    signal: Option<String>,
}

/// A validated road row, before lanes are created.
struct SegmentSpec {
    line: u64,
    id: String,
    geometry: Polyline,
    lane_count: usize,
    speed_limit: f64,
    oneway: bool,
    signal: bool,
    successors: Option<Vec<String>>,
}

/// One road from the table. Immutable after load.
#[derive(Debug, Clone)]
pub struct RoadSegment {
    pub id: String,
    pub geometry: Polyline,
    /// Lanes per direction.
    pub lane_count: usize,
    pub speed_limit: f64,
    pub oneway: bool,
    pub signal: bool,
    pub forward_lanes: Vec<LaneId>,
    pub reverse_lanes: Vec<LaneId>,
}

impl RoadSegment {
    pub fn length(&self) -> f64 {
        self.geometry.length()
    }

    pub fn lanes(&self) -> impl Iterator<Item = LaneId> + '_ {
        self.forward_lanes
            .iter()
            .chain(self.reverse_lanes.iter())
            .copied()
    }
}

/// Lanes of one segment travelling in one direction.
struct DirectionGroup {
    segment: usize,
    direction: Direction,
    lanes: Vec<LaneId>,
    from: JunctionId,
    to: JunctionId,
    start: Point,
    start_heading: f64,
    end: Point,
    end_heading: f64,
}

/// Clusters endpoints that lie within the snap tolerance of each other.
struct NodeIndex {
    tolerance: f64,
    points: Vec<Point>,
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl NodeIndex {
    fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            points: Vec::new(),
            cells: HashMap::new(),
        }
    }

    fn cell(&self, point: &Point) -> (i64, i64) {
        (
            (point.x / self.tolerance).floor() as i64,
            (point.y / self.tolerance).floor() as i64,
        )
    }

    fn node_for(&mut self, point: Point) -> JunctionId {
        let (cx, cy) = self.cell(&point);
        let mut best: Option<(usize, f64)> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(candidates) = self.cells.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for &node in candidates {
                    let distance = self.points[node].distance(&point);
                    if distance <= self.tolerance
                        && best.map_or(true, |(_, closest)| distance < closest)
                    {
                        best = Some((node, distance));
                    }
                }
            }
        }
        if let Some((node, _)) = best {
            return JunctionId(node as u32);
        }
        let node = self.points.len();
        self.points.push(point);
        self.cells.entry((cx, cy)).or_default().push(node);
        JunctionId(node as u32)
    }
}

/// Directed lane graph with geometry. Read-only once loaded.
#[derive(Debug, Clone)]
pub struct RoadNetwork {
    segments: Vec<RoadSegment>,
    lanes: Vec<Lane>,
    junctions: Vec<Junction>,
    segment_index: HashMap<String, usize>,
    lane_width: f64,
    geometry: Arc<RoadGeometry>,
}

impl RoadNetwork {
    pub fn load(path: impl AsRef<Path>, config: &SimConfig) -> Result<Self, FormatError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| FormatError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let network = Self::from_reader(file, config)?;
        log::info!(
            "Loaded {} road segments ({} lanes, {} junctions) from {}",
            network.segments.len(),
            network.lanes.len(),
            network.junctions.len(),
            path.display()
        );
        Ok(network)
    }

    pub fn from_reader<R: Read>(reader: R, config: &SimConfig) -> Result<Self, FormatError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();
        require_columns(&headers)?;

        let mut specs = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            let row: RoadRow = record.deserialize(Some(&headers))?;
            specs.push(parse_segment(row, line, config)?);
        }
        if specs.is_empty() {
            return Err(FormatError::Empty { table: TABLE });
        }
        Self::build(specs, config)
    }

    fn build(specs: Vec<SegmentSpec>, config: &SimConfig) -> Result<Self, FormatError> {
        let mut segment_index = HashMap::new();
        for (index, spec) in specs.iter().enumerate() {
            if segment_index.insert(spec.id.clone(), index).is_some() {
                return Err(FormatError::DuplicateSegment {
                    line: spec.line,
                    id: spec.id.clone(),
                });
            }
        }
        for spec in &specs {
            for successor in spec.successors.iter().flatten() {
                if !segment_index.contains_key(successor) {
                    return Err(FormatError::UnknownSuccessor {
                        segment: spec.id.clone(),
                        successor: successor.clone(),
                    });
                }
            }
        }

        let mut nodes = NodeIndex::new(config.network.snap_tolerance);
        let mut lanes: Vec<Lane> = Vec::new();
        let mut groups: Vec<DirectionGroup> = Vec::new();
        let mut segments = Vec::with_capacity(specs.len());
        let mut explicit_successors = Vec::with_capacity(specs.len());

        for (index, spec) in specs.into_iter().enumerate() {
            let start_node = nodes.node_for(spec.geometry.start());
            let end_node = nodes.node_for(spec.geometry.end());

            let forward_lanes = push_lanes(
                &mut lanes,
                &spec,
                index,
                Direction::Forward,
                &spec.geometry,
                start_node,
                end_node,
            );
            groups.push(DirectionGroup {
                segment: index,
                direction: Direction::Forward,
                lanes: forward_lanes.clone(),
                from: start_node,
                to: end_node,
                start: spec.geometry.start(),
                start_heading: spec.geometry.start_heading(),
                end: spec.geometry.end(),
                end_heading: spec.geometry.end_heading(),
            });

            let mut reverse_lanes = Vec::new();
            if !spec.oneway {
                let reversed = spec.geometry.reversed();
                reverse_lanes = push_lanes(
                    &mut lanes,
                    &spec,
                    index,
                    Direction::Reverse,
                    &reversed,
                    end_node,
                    start_node,
                );
                groups.push(DirectionGroup {
                    segment: index,
                    direction: Direction::Reverse,
                    lanes: reverse_lanes.clone(),
                    from: end_node,
                    to: start_node,
                    start: reversed.start(),
                    start_heading: reversed.start_heading(),
                    end: reversed.end(),
                    end_heading: reversed.end_heading(),
                });
            }

            explicit_successors.push(spec.successors);
            segments.push(RoadSegment {
                id: spec.id,
                geometry: spec.geometry,
                lane_count: spec.lane_count,
                speed_limit: spec.speed_limit,
                oneway: spec.oneway,
                signal: spec.signal,
                forward_lanes,
                reverse_lanes,
            });
        }

        connect_groups(&mut lanes, &groups, &explicit_successors, &segment_index);

        let junctions = build_junctions(
            &nodes.points,
            &lanes,
            &groups,
            &segments,
            config.junction.default_policy,
        );
        let geometry = Arc::new(build_geometry(&segments, &junctions, config.network.lane_width));

        Ok(Self {
            segments,
            lanes,
            junctions,
            segment_index,
            lane_width: config.network.lane_width,
            geometry,
        })
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn lane(&self, id: LaneId) -> Option<&Lane> {
        self.lanes.get(id.index())
    }

    pub fn lane_by_key(&self, key: &str) -> Option<LaneId> {
        let key: LaneKey = key.parse().ok()?;
        let segment = self.segment_by_id(&key.segment)?;
        let lanes = match key.direction {
            Direction::Forward => &segment.forward_lanes,
            Direction::Reverse => &segment.reverse_lanes,
        };
        lanes.get(key.index).copied()
    }

    pub fn lane_key(&self, id: LaneId) -> String {
        self.lane(id)
            .map_or_else(|| id.to_string(), |lane| lane.key.to_string())
    }

    pub fn successors(&self, id: LaneId) -> &[LaneId] {
        self.lane(id).map_or(&[], |lane| lane.successors.as_slice())
    }

    pub fn predecessors(&self, id: LaneId) -> &[LaneId] {
        self.lane(id).map_or(&[], |lane| lane.predecessors.as_slice())
    }

    /// Successor whose heading continues most directly.
    pub fn preferred_successor(&self, id: LaneId) -> Option<LaneId> {
        self.successors(id).first().copied()
    }

    pub fn is_source(&self, id: LaneId) -> bool {
        self.predecessors(id).is_empty()
    }

    /// A lane is a sink when it leads nowhere except back along its own
    /// segment. Dead ends of two-way roads are sinks even though a U-turn is
    /// linked there.
    pub fn is_sink(&self, id: LaneId) -> bool {
        let Some(lane) = self.lane(id) else {
            return true;
        };
        lane.successors.iter().all(|&next| self.is_u_turn(lane, next))
    }

    fn is_u_turn(&self, lane: &Lane, next: LaneId) -> bool {
        self.lane(next).is_some_and(|target| {
            target.segment == lane.segment && target.key.direction != lane.key.direction
        })
    }

    /// World position and heading at arc length `s` along a lane.
    pub fn world_position(&self, id: LaneId, s: f64) -> Option<Pose> {
        self.lane(id).map(|lane| lane.geometry.sample(s))
    }

    /// Sideways distance of a lane from its segment centreline, to the right
    /// of the direction of travel. Used only for drawing.
    pub fn lateral_offset(&self, id: LaneId) -> f64 {
        let Some(lane) = self.lane(id) else {
            return 0.0;
        };
        let segment = &self.segments[lane.segment];
        let index = lane.key.index as f64;
        if segment.oneway {
            (index - (segment.lane_count as f64 - 1.0) / 2.0) * self.lane_width
        } else {
            (index + 0.5) * self.lane_width
        }
    }

    pub fn segments(&self) -> &[RoadSegment] {
        &self.segments
    }

    pub fn segment(&self, index: usize) -> Option<&RoadSegment> {
        self.segments.get(index)
    }

    pub fn segment_index(&self, id: &str) -> Option<usize> {
        self.segment_index.get(id).copied()
    }

    pub fn segment_by_id(&self, id: &str) -> Option<&RoadSegment> {
        self.segment_index(id).map(|index| &self.segments[index])
    }

    pub fn junctions(&self) -> &[Junction] {
        &self.junctions
    }

    pub fn junction(&self, id: JunctionId) -> Option<&Junction> {
        self.junctions.get(id.index())
    }

    pub fn junction_at_end(&self, id: LaneId) -> Option<&Junction> {
        self.lane(id).and_then(|lane| self.junction(lane.to))
    }

    pub fn geometry(&self) -> Arc<RoadGeometry> {
        Arc::clone(&self.geometry)
    }
}

fn require_columns(headers: &csv::StringRecord) -> Result<(), FormatError> {
    let has = |name: &str| headers.iter().any(|h| h == name);
    for column in ["id", "lane_count", "speed_limit"] {
        if !has(column) {
            return Err(FormatError::MissingColumn {
                table: TABLE,
                column,
            });
        }
    }
    let legacy = ["x1", "y1", "x2", "y2"].iter().all(|c| has(c));
    if !has("geometry") && !legacy {
        return Err(FormatError::MissingColumn {
            table: TABLE,
            column: "geometry",
        });
    }
    Ok(())
}

fn parse_segment(row: RoadRow, line: u64, config: &SimConfig) -> Result<SegmentSpec, FormatError> {
    let invalid = |column: &'static str, value: String, reason: &str| FormatError::InvalidField {
        line,
        column,
        value,
        reason: reason.to_string(),
    };

    if row.id.is_empty() || row.id.contains(':') {
        return Err(invalid("id", row.id, "must be non-empty and must not contain `:`"));
    }

    let points = match row.geometry.as_deref().filter(|g| !g.is_empty()) {
        Some(text) => parse_points(text).map_err(|reason| invalid("geometry", text.to_string(), &reason))?,
        None => match (row.x1, row.y1, row.x2, row.y2) {
            (Some(x1), Some(y1), Some(x2), Some(y2)) => {
                vec![Point::new(x1, y1), Point::new(x2, y2)]
            }
            _ => return Err(invalid("geometry", String::new(), "no points given")),
        },
    };

    if row.lane_count < 1 {
        return Err(FormatError::InvalidLaneCount {
            line,
            value: row.lane_count,
        });
    }
    if !(row.speed_limit.is_finite() && row.speed_limit > 0.0) {
        return Err(invalid(
            "speed_limit",
            row.speed_limit.to_string(),
            "must be a positive number",
        ));
    }

    let geometry = Polyline::new(points).ok_or_else(|| FormatError::DegenerateGeometry {
        segment: row.id.clone(),
        reason: "fewer than two distinct points".to_string(),
    })?;
    if geometry.length() < config.network.min_segment_length {
        return Err(FormatError::DegenerateGeometry {
            segment: row.id.clone(),
            reason: format!(
                "length {:.4} is below the minimum {}",
                geometry.length(),
                config.network.min_segment_length
            ),
        });
    }

    let oneway = match row.oneway.as_deref() {
        Some(value) => parse_flag(value).map_err(|reason| invalid("oneway", value.to_string(), &reason))?,
        None => true,
    };
    let signal = match row.signal.as_deref() {
        Some(value) => parse_flag(value).map_err(|reason| invalid("signal", value.to_string(), &reason))?,
        None => false,
    };
    let successors = row
        .successors
        .as_deref()
        .map(|list| {
            list.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|list| !list.is_empty());

    Ok(SegmentSpec {
        line,
        id: row.id,
        geometry,
        lane_count: row.lane_count as usize,
        speed_limit: row.speed_limit,
        oneway,
        signal,
        successors,
    })
}

/// Parses `x y;x y;...`. Coordinates within a point may also be separated
/// by a comma, points by `|`.
fn parse_points(text: &str) -> Result<Vec<Point>, String> {
    text.split([';', '|'])
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            let coords: Vec<&str> = piece
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|c| !c.is_empty())
                .collect();
            let [x, y] = coords.as_slice() else {
                return Err(format!("point `{piece}` must have exactly two coordinates"));
            };
            let x: f64 = x.parse().map_err(|_| format!("bad coordinate `{x}`"))?;
            let y: f64 = y.parse().map_err(|_| format!("bad coordinate `{y}`"))?;
            if !(x.is_finite() && y.is_finite()) {
                return Err(format!("point `{piece}` is not finite"));
            }
            Ok(Point::new(x, y))
        })
        .collect()
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "n" => Ok(false),
        "1" | "true" | "yes" | "y" => Ok(true),
        other => Err(format!("`{other}` is not a boolean")),
    }
}

fn push_lanes(
    lanes: &mut Vec<Lane>,
    spec: &SegmentSpec,
    segment: usize,
    direction: Direction,
    geometry: &Polyline,
    from: JunctionId,
    to: JunctionId,
) -> Vec<LaneId> {
    (0..spec.lane_count)
        .map(|index| {
            let id = LaneId(lanes.len() as u32);
            lanes.push(Lane {
                id,
                key: LaneKey::new(spec.id.clone(), direction, index),
                segment,
                from,
                to,
                geometry: geometry.clone(),
                speed_limit: spec.speed_limit,
                successors: Vec::new(),
                predecessors: Vec::new(),
            });
            id
        })
        .collect()
}

/// Links every lane to the lanes it may continue into. Explicit successor
/// records win over geometric snapping; U-turns are a last resort.
fn connect_groups(
    lanes: &mut [Lane],
    groups: &[DirectionGroup],
    explicit_successors: &[Option<Vec<String>>],
    segment_index: &HashMap<String, usize>,
) {
    let mut starting_at: HashMap<JunctionId, Vec<usize>> = HashMap::new();
    for (index, group) in groups.iter().enumerate() {
        starting_at.entry(group.from).or_default().push(index);
    }

    for group in groups {
        let mut candidates: Vec<usize> = match &explicit_successors[group.segment] {
            Some(listed) => listed
                .iter()
                .filter_map(|id| segment_index.get(id))
                .filter_map(|&segment| {
                    groups
                        .iter()
                        .enumerate()
                        .filter(|(_, g)| g.segment == segment)
                        .min_by(|(_, a), (_, b)| {
                            a.start
                                .distance(&group.end)
                                .total_cmp(&b.start.distance(&group.end))
                        })
                        .map(|(index, _)| index)
                })
                .collect(),
            None => {
                let starting = starting_at.get(&group.to).cloned().unwrap_or_default();
                let onward: Vec<usize> = starting
                    .iter()
                    .copied()
                    .filter(|&h| {
                        let next = &groups[h];
                        !(next.segment == group.segment && next.direction != group.direction)
                    })
                    .collect();
                if onward.is_empty() {
                    starting
                } else {
                    onward
                }
            }
        };
        candidates.sort_by(|&a, &b| {
            let da = heading_deviation(group.end_heading, groups[a].start_heading);
            let db = heading_deviation(group.end_heading, groups[b].start_heading);
            da.total_cmp(&db).then(a.cmp(&b))
        });
        candidates.dedup();

        for (position, &lane) in group.lanes.iter().enumerate() {
            for &target in &candidates {
                let target_lanes = &groups[target].lanes;
                let successor = target_lanes[position.min(target_lanes.len() - 1)];
                if !lanes[lane.index()].successors.contains(&successor) {
                    lanes[lane.index()].successors.push(successor);
                    lanes[successor.index()].predecessors.push(lane);
                }
            }
        }
    }
}

fn build_junctions(
    points: &[Point],
    lanes: &[Lane],
    groups: &[DirectionGroup],
    segments: &[RoadSegment],
    default_policy: JunctionPolicy,
) -> Vec<Junction> {
    let mut group_of_lane = vec![0usize; lanes.len()];
    for (index, group) in groups.iter().enumerate() {
        for lane in &group.lanes {
            group_of_lane[lane.index()] = index;
        }
    }

    points
        .iter()
        .enumerate()
        .map(|(node, &position)| {
            let id = JunctionId(node as u32);
            let incoming: Vec<LaneId> =
                lanes.iter().filter(|l| l.to == id).map(|l| l.id).collect();
            let outgoing: Vec<LaneId> =
                lanes.iter().filter(|l| l.from == id).map(|l| l.id).collect();

            let mut approaches: Vec<(usize, Vec<LaneId>)> = Vec::new();
            for &lane in &incoming {
                let group = group_of_lane[lane.index()];
                match approaches.iter_mut().find(|(g, _)| *g == group) {
                    Some((_, members)) => members.push(lane),
                    None => approaches.push((group, vec![lane])),
                }
            }

            let touching: BTreeSet<usize> = incoming
                .iter()
                .chain(outgoing.iter())
                .map(|lane| lanes[lane.index()].segment)
                .collect();
            let signal = incoming
                .iter()
                .any(|lane| segments[lanes[lane.index()].segment].signal);

            // A target direction fed by more than one approach is a merge.
            let mut feeders: HashMap<usize, BTreeSet<usize>> = HashMap::new();
            for (approach, members) in &approaches {
                for lane in members {
                    for successor in &lanes[lane.index()].successors {
                        feeders
                            .entry(group_of_lane[successor.index()])
                            .or_default()
                            .insert(*approach);
                    }
                }
            }
            let merge = feeders.values().any(|set| set.len() > 1);

            let control = if incoming.is_empty() || outgoing.is_empty() {
                JunctionControl::Uncontrolled
            } else if signal {
                JunctionControl::Arbitrated(JunctionPolicy::Signal)
            } else if touching.len() >= 3 || merge {
                JunctionControl::Arbitrated(default_policy)
            } else {
                JunctionControl::Uncontrolled
            };

            Junction {
                id,
                position,
                incoming,
                outgoing,
                approaches: approaches.into_iter().map(|(_, members)| members).collect(),
                control,
            }
        })
        .collect()
}

fn build_geometry(segments: &[RoadSegment], junctions: &[Junction], lane_width: f64) -> RoadGeometry {
    let mut bounds = Bounds::empty();
    let visuals = segments
        .iter()
        .map(|segment| {
            for point in segment.geometry.points() {
                bounds.include(point);
            }
            SegmentVisual {
                id: segment.id.clone(),
                points: segment.geometry.points().to_vec(),
                lane_count: segment.lane_count,
                oneway: segment.oneway,
            }
        })
        .collect();
    RoadGeometry {
        segments: visuals,
        junctions: junctions
            .iter()
            .filter(|j| j.needs_arbitration())
            .map(|j| j.position)
            .collect(),
        bounds,
        lane_width,
    }
}
