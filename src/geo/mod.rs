use crate::models::drone::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    // Rounding can push this a hair past 1.0 for antipodal points.
    let haversine = (sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng).min(1.0);
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

pub fn distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    haversine_km(
        &GeoPoint {
            lat: lat1,
            lng: lng1,
        },
        &GeoPoint {
            lat: lat2,
            lng: lng2,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::{distance, haversine_km};
    use crate::models::drone::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 39.9042,
            lng: 116.4074,
        };
        let distance = haversine_km(&p, &p);
        assert_eq!(distance, 0.0);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn symmetric_and_non_negative() {
        let points = [
            (39.90, 116.40),
            (39.91, 116.41),
            (-33.8688, 151.2093),
            (0.0, 179.9),
            (0.0, -179.9),
        ];

        for &(lat1, lng1) in &points {
            for &(lat2, lng2) in &points {
                let forward = distance(lat1, lng1, lat2, lng2);
                let backward = distance(lat2, lng2, lat1, lng1);
                assert!(forward >= 0.0);
                assert!((forward - backward).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn beijing_offer_is_about_one_and_a_half_km_away() {
        let km = distance(39.90, 116.40, 39.91, 116.41);
        assert!(km > 1.3 && km < 1.5, "got {km}");
    }
}
