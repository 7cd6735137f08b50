use coastal_htf::{
    AssociationBuilder, CountyFips, Geometry, LatLon, NearestStationFinder, ReferencePoint,
    RegionMap, RegionProjector, SearchParams, Station, WeightCalculator,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// Deterministic grid of points along a stretch of Gulf coastline.
fn coastline(n: usize, offset: f64) -> Vec<LatLon> {
    (0..n)
        .map(|i| {
            let t = i as f64 / n as f64;
            LatLon(
                29.0 + 0.5 * (t * 12.0 + offset).sin(),
                -97.0 + 8.0 * t + offset * 0.01,
            )
        })
        .collect()
}

fn bench_association(c: &mut Criterion) {
    let stations: Vec<Station> = coastline(300, 0.0)
        .into_iter()
        .enumerate()
        .map(|(i, location)| Station {
            id: format!("{:07}", 8_700_000 + i),
            name: format!("Gauge {i}"),
            location,
            region: "gulf_coast".to_string(),
            sub_region: None,
        })
        .collect();
    let points: Vec<ReferencePoint> = coastline(1000, 0.37)
        .into_iter()
        .enumerate()
        .filter_map(|(i, location)| {
            let fips = CountyFips::parse(&format!("48{:03}", i % 1000))?;
            let mut point =
                ReferencePoint::county(fips, format!("County {i}"), "gulf_coast", Geometry::Point(location));
            point.id = format!("point-{i}");
            Some(point)
        })
        .collect();

    let regions = RegionMap::default();
    let projector = RegionProjector::new(&regions);
    let projection = projector.for_region("gulf_coast");
    let positions: Vec<[f64; 2]> = stations.iter().map(|s| projection.project(s.location)).collect();
    let finder = NearestStationFinder::new(&positions, SearchParams::default());
    let query = projection.project(LatLon(29.3, -94.8));

    c.bench_function("finder_query", |b| b.iter(|| finder.query(black_box(query))));

    let calculator = WeightCalculator::default();
    let candidates = [(0usize, 1_200.0), (1, 8_500.0), (2, 40_000.0)];
    c.bench_function("idw_weights", |b| {
        b.iter(|| calculator.calculate(black_box(&candidates)))
    });

    let builder = AssociationBuilder::new(
        RegionProjector::new(&regions),
        SearchParams::default(),
        WeightCalculator::default(),
    );
    c.bench_function("associate_1000_points", |b| {
        b.iter(|| builder.build(black_box(&points), black_box(&stations)))
    });
}

criterion_group!(benches, bench_association);
criterion_main!(benches);
